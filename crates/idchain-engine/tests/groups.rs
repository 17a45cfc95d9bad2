//! Group lifecycle: founding, invitations, membership and administration.

mod common;

use common::{failure_kind, DAY};
use idchain_core::{ConnectionLevel, GroupId, GroupType, OperationState};
use idchain_engine::ErrorKind;
use idchain_testkit::fixtures::identities;
use idchain_testkit::{TestIdentity, TestNet};

const GROUP: &str = "g";

fn gid() -> GroupId {
    GroupId::from(GROUP)
}

async fn founded(net: &TestNet) -> Vec<TestIdentity> {
    let ids = identities(6);
    net.found_group(GROUP, [&ids[0], &ids[1], &ids[2]], GroupType::General)
        .await;
    ids
}

/// Connect the first two founders to `outsider` and let them join.
async fn join(net: &TestNet, ids: &[TestIdentity], outsider: &TestIdentity) {
    let now = net.now();
    net.apply(ids[0].connect(outsider, None, now)).await;
    net.apply(ids[1].connect(outsider, None, now)).await;
    net.apply(ids[0].invite(outsider, GROUP, now)).await;
    net.apply(outsider.add_membership(GROUP, now)).await;
}

#[tokio::test]
async fn test_founding() {
    let net = TestNet::new();
    let ids = founded(&net).await;

    let group = net.engine.group_view(&gid()).await.unwrap().unwrap();
    let mut founders: Vec<_> = ids[..3].iter().map(TestIdentity::id).collect();
    founders.sort();
    assert_eq!(group.founders, founders);
    assert_eq!(group.admins, founders);
    assert_eq!(group.members.len(), 3);
    assert!(!group.is_new);
    assert_eq!(group.group_type, GroupType::General);

    let memberships = net.engine.memberships(&ids[1].id()).await.unwrap();
    assert_eq!(memberships.len(), 1);
    assert_eq!(memberships[0].group, gid());
}

#[tokio::test]
async fn test_founders_must_be_connected_both_ways() {
    let net = TestNet::new();
    let ids = identities(3);
    let now = net.now();
    net.apply(ids[0].connect(&ids[1], None, now)).await;
    net.apply(ids[0].connect(&ids[2], None, now)).await;

    let outcome = net
        .submit(ids[0].add_group(GROUP, [&ids[1], &ids[2]], GroupType::General, now))
        .await;
    assert_eq!(failure_kind(&outcome), ErrorKind::NotEligible);
    assert!(net.engine.group_view(&gid()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_group_key_is_unique() {
    let net = TestNet::new();
    let ids = founded(&net).await;
    net.advance(1);

    let outcome = net
        .submit(ids[0].add_group(GROUP, [&ids[1], &ids[2]], GroupType::General, net.now()))
        .await;
    assert_eq!(failure_kind(&outcome), ErrorKind::AlreadyExists);
}

#[tokio::test]
async fn test_new_group_only_accepts_founders() {
    let net = TestNet::new();
    let ids = identities(4);
    for other in &ids[1..] {
        net.connect_both(&ids[0], other, ConnectionLevel::AlreadyKnown)
            .await;
    }
    let now = net.now();
    net.apply(ids[0].add_group(GROUP, [&ids[1], &ids[2]], GroupType::General, now))
        .await;

    let group = net.engine.group_view(&gid()).await.unwrap().unwrap();
    assert!(group.is_new);
    assert_eq!(group.members, vec![ids[0].id()]);

    let invite = net.submit(ids[0].invite(&ids[3], GROUP, now)).await;
    assert_eq!(failure_kind(&invite), ErrorKind::AccessDenied);

    let join = net.submit(ids[3].add_membership(GROUP, now)).await;
    assert_eq!(failure_kind(&join), ErrorKind::AccessDenied);
}

#[tokio::test]
async fn test_invite_and_join() {
    let net = TestNet::new();
    let ids = founded(&net).await;
    let dave = &ids[3];

    let now = net.now();
    net.apply(ids[0].connect(dave, None, now)).await;
    net.apply(ids[1].connect(dave, None, now)).await;

    let eligible = net.engine.refresh_eligible_groups(&dave.id()).await.unwrap();
    assert_eq!(eligible, vec![gid()]);

    net.apply(ids[0].invite(dave, GROUP, now)).await;
    assert_eq!(net.engine.invitations(&dave.id()).await.unwrap().len(), 1);
    assert_eq!(net.engine.group_invitations(&gid()).await.unwrap().len(), 1);

    net.apply(dave.add_membership(GROUP, now)).await;
    let group = net.engine.group_view(&gid()).await.unwrap().unwrap();
    assert_eq!(group.members.len(), 4);
    assert!(group.members.contains(&dave.id()));
    assert!(net.engine.invitations(&dave.id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_join_without_invitation() {
    let net = TestNet::new();
    let ids = founded(&net).await;
    let dave = &ids[3];

    let now = net.now();
    net.apply(ids[0].connect(dave, None, now)).await;
    net.apply(ids[1].connect(dave, None, now)).await;

    let outcome = net.submit(dave.add_membership(GROUP, now)).await;
    assert_eq!(failure_kind(&outcome), ErrorKind::AccessDenied);
}

#[tokio::test]
async fn test_invitee_must_be_eligible() {
    let net = TestNet::new();
    let ids = founded(&net).await;
    let eve = &ids[4];

    net.apply(ids[0].connect(eve, None, net.now())).await;
    let outcome = net.submit(ids[0].invite(eve, GROUP, net.now())).await;
    assert_eq!(failure_kind(&outcome), ErrorKind::NotEligible);
}

#[tokio::test]
async fn test_invitation_expires() {
    let net = TestNet::new();
    let ids = founded(&net).await;
    let dave = &ids[3];

    let now = net.now();
    net.apply(ids[0].connect(dave, None, now)).await;
    net.apply(ids[1].connect(dave, None, now)).await;
    net.apply(ids[0].invite(dave, GROUP, now)).await;

    net.advance(DAY);
    assert!(net.engine.invitations(&dave.id()).await.unwrap().is_empty());

    let outcome = net.submit(dave.add_membership(GROUP, net.now())).await;
    assert_eq!(failure_kind(&outcome), ErrorKind::AccessDenied);

    // A fresh invitation replaces the stale one.
    net.apply(ids[1].invite(dave, GROUP, net.now())).await;
    net.advance(1);
    net.apply(dave.add_membership(GROUP, net.now())).await;
}

#[tokio::test]
async fn test_only_admins_invite() {
    let net = TestNet::new();
    let ids = founded(&net).await;
    join(&net, &ids, &ids[3]).await;

    let eve = &ids[4];
    let now = net.now();
    net.apply(ids[0].connect(eve, None, now)).await;
    net.apply(ids[1].connect(eve, None, now)).await;

    let outcome = net.submit(ids[3].invite(eve, GROUP, now)).await;
    assert_eq!(failure_kind(&outcome), ErrorKind::AccessDenied);
}

#[tokio::test]
async fn test_last_admin_cannot_leave() {
    let net = TestNet::new();
    let ids = founded(&net).await;
    let now = net.now();

    net.apply(ids[1].remove_membership(GROUP, now)).await;
    net.apply(ids[2].remove_membership(GROUP, now)).await;

    let outcome = net.submit(ids[0].remove_membership(GROUP, now)).await;
    assert_eq!(failure_kind(&outcome), ErrorKind::InvariantViolation);

    let group = net.engine.group_view(&gid()).await.unwrap().unwrap();
    assert_eq!(group.members, vec![ids[0].id()]);
    assert_eq!(group.admins, vec![ids[0].id()]);
}

#[tokio::test]
async fn test_dismiss_and_promote() {
    let net = TestNet::new();
    let ids = founded(&net).await;
    let dave = &ids[3];
    join(&net, &ids, dave).await;
    let now = net.now();

    let outcome = net.submit(dave.dismiss(&ids[1], GROUP, now)).await;
    assert_eq!(failure_kind(&outcome), ErrorKind::AccessDenied);

    let outcome = net.submit(ids[0].add_admin(&ids[4], GROUP, now)).await;
    assert_eq!(failure_kind(&outcome), ErrorKind::NotEligible);

    net.apply(ids[0].add_admin(dave, GROUP, now)).await;
    let group = net.engine.group_view(&gid()).await.unwrap().unwrap();
    assert!(group.admins.contains(&dave.id()));

    net.apply(dave.dismiss(&ids[1], GROUP, now)).await;
    let group = net.engine.group_view(&gid()).await.unwrap().unwrap();
    assert!(!group.members.contains(&ids[1].id()));
    assert!(!group.admins.contains(&ids[1].id()));
}

#[tokio::test]
async fn test_primary_group_is_unique() {
    let net = TestNet::new();
    let ids = identities(5);
    net.found_group("p1", [&ids[0], &ids[1], &ids[2]], GroupType::Primary)
        .await;
    net.connect_both(&ids[0], &ids[3], ConnectionLevel::AlreadyKnown)
        .await;
    net.connect_both(&ids[0], &ids[4], ConnectionLevel::AlreadyKnown)
        .await;

    let user = net.engine.user_view(&ids[0].id()).await.unwrap().unwrap();
    assert!(user.has_primary_group);

    let now = net.now();
    let outcome = net
        .submit(ids[0].add_group("p2", [&ids[3], &ids[4]], GroupType::Primary, now))
        .await;
    assert_eq!(failure_kind(&outcome), ErrorKind::InvariantViolation);

    let outcome = net
        .submit(ids[0].add_group("g2", [&ids[3], &ids[4]], GroupType::General, now))
        .await;
    assert_eq!(outcome.state, OperationState::Applied);
}

#[tokio::test]
async fn test_update_and_remove_group() {
    let net = TestNet::new();
    let ids = founded(&net).await;
    net.advance(1_000);

    net.apply(ids[0].update_group(GROUP, Some("https://example.org/g"), net.now()))
        .await;
    let group = net.engine.group_view(&gid()).await.unwrap().unwrap();
    assert_eq!(group.url.as_deref(), Some("https://example.org/g"));
    assert_eq!(group.timestamp, net.now());

    let outsider = net.submit(ids[3].remove_group(GROUP, net.now())).await;
    assert_eq!(failure_kind(&outsider), ErrorKind::AccessDenied);

    net.apply(ids[1].remove_group(GROUP, net.now())).await;
    assert!(net.engine.group_view(&gid()).await.unwrap().is_none());
    assert!(net.engine.memberships(&ids[0].id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_primary_member_cannot_be_invited_to_another_primary() {
    let net = TestNet::new();
    let ids = identities(6);
    net.found_group("p1", [&ids[0], &ids[1], &ids[2]], GroupType::Primary)
        .await;
    net.found_group("p2", [&ids[3], &ids[4], &ids[5]], GroupType::Primary)
        .await;

    let now = net.now();
    net.apply(ids[3].connect(&ids[0], None, now)).await;
    net.apply(ids[4].connect(&ids[0], None, now)).await;

    let outcome = net.submit(ids[3].invite(&ids[0], "p2", now)).await;
    assert_eq!(failure_kind(&outcome), ErrorKind::InvariantViolation);

    net.apply(ids[0].remove_membership("p1", now)).await;
    net.advance(1);
    net.apply(ids[3].invite(&ids[0], "p2", net.now())).await;
    net.apply(ids[0].add_membership("p2", net.now())).await;
}
