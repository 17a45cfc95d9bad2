//! Context-id linking.

mod common;

use common::{failure_kind, DAY};
use idchain_engine::ErrorKind;
use idchain_testkit::{TestIdentity, TestNet};

const CONTEXT: &str = "ethereum";

async fn net() -> TestNet {
    let net = TestNet::new();
    net.register_context(CONTEXT, true, None).await;
    net
}

async fn link_times(net: &TestNet, id: &TestIdentity) -> Vec<(String, i64)> {
    net.engine
        .graph()
        .links_of(&id.id(), CONTEXT)
        .await
        .unwrap()
        .into_iter()
        .map(|l| (l.context_id, l.timestamp))
        .collect()
}

#[tokio::test]
async fn test_link_hex_context_id() {
    let net = net().await;
    let alice = TestIdentity::named("alice");

    net.apply(alice.link(CONTEXT, "0xABCDEF", net.now())).await;

    let owner = net
        .engine
        .user_by_context_id(CONTEXT, "0xAbCdEf")
        .await
        .unwrap();
    assert_eq!(owner, Some(alice.id()));
    assert_eq!(
        net.engine.context_ids(&alice.id(), CONTEXT).await.unwrap(),
        vec!["0xabcdef".to_owned()]
    );
}

#[tokio::test]
async fn test_context_id_belongs_to_one_identity() {
    let net = net().await;
    let carol = TestIdentity::named("carol");
    let dave = TestIdentity::named("dave");
    let start = net.now();

    net.advance(5);
    net.apply(carol.link(CONTEXT, "0xabc", net.now())).await;

    net.advance(5);
    let outcome = net.submit(dave.link(CONTEXT, "0xABC", net.now())).await;
    assert_eq!(failure_kind(&outcome), ErrorKind::AlreadyExists);
    assert_eq!(link_times(&net, &carol).await, vec![("0xabc".to_owned(), start + 5)]);
    assert!(link_times(&net, &dave).await.is_empty());

    net.advance(10);
    net.apply(carol.link(CONTEXT, "0xABC", net.now())).await;
    assert_eq!(link_times(&net, &carol).await, vec![("0xabc".to_owned(), start + 20)]);
    assert_eq!(
        net.engine.user_by_context_id(CONTEXT, "0xabc").await.unwrap(),
        Some(carol.id())
    );
}

#[tokio::test]
async fn test_new_links_are_capped_per_day() {
    let net = net().await;
    let alice = TestIdentity::named("alice");

    for cid in ["0x1", "0x2", "0x3"] {
        net.apply(alice.link(CONTEXT, cid, net.now())).await;
    }
    let outcome = net.submit(alice.link(CONTEXT, "0x4", net.now())).await;
    assert_eq!(failure_kind(&outcome), ErrorKind::RateLimited);

    // Re-linking a held id is not a new link.
    net.advance(1);
    net.apply(alice.link(CONTEXT, "0x1", net.now())).await;
    let ids = net.engine.context_ids(&alice.id(), CONTEXT).await.unwrap();
    assert_eq!(ids.len(), 3);
    assert_eq!(ids[0], "0x1");

    net.advance(DAY);
    net.apply(alice.link(CONTEXT, "0x4", net.now())).await;
    let ids = net.engine.context_ids(&alice.id(), CONTEXT).await.unwrap();
    assert_eq!(ids[0], "0x4");
}

#[tokio::test]
async fn test_link_clears_its_test_markers() {
    let net = net().await;
    let alice = TestIdentity::named("alice");

    net.engine
        .add_testblock("0xdead", "some-app", "link")
        .await
        .unwrap();
    net.engine
        .add_testblock("0xdead", "some-app", "sponsorship")
        .await
        .unwrap();
    assert_eq!(
        net.engine.graph().testblocks("0xdead", None).await.unwrap().len(),
        2
    );

    net.apply(alice.link(CONTEXT, "0xDEAD", net.now())).await;
    assert_eq!(
        net.engine.graph().testblocks("0xdead", None).await.unwrap(),
        vec!["sponsorship".to_owned()]
    );
}

#[tokio::test]
async fn test_refused_link_still_clears_test_markers() {
    let net = net().await;
    let alice = TestIdentity::named("alice");
    let bob = TestIdentity::named("bob");

    net.apply(alice.link(CONTEXT, "0xbeef", net.now())).await;
    net.engine
        .add_testblock("0xbeef", "some-app", "link")
        .await
        .unwrap();

    let outcome = net.submit(bob.link(CONTEXT, "0xBEEF", net.now())).await;
    assert_eq!(failure_kind(&outcome), ErrorKind::AlreadyExists);
    assert!(net
        .engine
        .graph()
        .testblocks("0xbeef", None)
        .await
        .unwrap()
        .is_empty());
}
