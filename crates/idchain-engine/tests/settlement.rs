//! Settlement of operations: idempotence, failure recording, sealed links
//! and submission admission.

mod common;

use common::{failure_kind, init_tracing, HOUR};
use idchain_core::{operation_hash, ConnectionLevel, Operation, OperationState};
use idchain_engine::{Direction, EngineConfig, ErrorKind};
use idchain_testkit::{sign, TestIdentity, TestNet};

#[tokio::test]
async fn test_resubmission_is_duplicate() {
    init_tracing();
    let net = TestNet::new();
    let alice = TestIdentity::named("alice");
    let bob = TestIdentity::named("bob");

    let op = alice.connect(&bob, Some(ConnectionLevel::JustMet), net.now());
    let first = net.submit(op.clone()).await;
    assert_eq!(first.state, OperationState::Applied);

    let second = net.submit(op).await;
    assert_eq!(second.state, OperationState::Duplicate);
    assert_eq!(second.hash, first.hash);

    let record = net.engine.operation_status(&first.hash).await.unwrap().unwrap();
    assert_eq!(record.state, OperationState::Applied);

    let counts = net.engine.ledger_state().await.unwrap();
    assert_eq!(counts.get("applied"), Some(&1));
    assert_eq!(counts.get("duplicate"), None);
}

#[tokio::test]
async fn test_concurrent_submissions_apply_once() {
    let net = TestNet::new();
    let alice = TestIdentity::named("alice");
    let bob = TestIdentity::named("bob");

    let op = alice
        .connect(&bob, None, net.now())
        .with_block_time(net.now());
    let hash = operation_hash(&op).unwrap();

    let (a, b) = tokio::join!(
        net.engine.apply_operation(hash, op.clone()),
        net.engine.apply_operation(hash, op),
    );
    let mut states = vec![a.unwrap().state, b.unwrap().state];
    states.sort_by_key(|s| s.as_str());
    assert_eq!(states, vec![OperationState::Applied, OperationState::Duplicate]);
}

#[tokio::test]
async fn test_failed_operation_can_be_resubmitted() {
    let net = TestNet::new();
    let alice = TestIdentity::named("alice");
    let bob = TestIdentity::named("bob");
    let carol = TestIdentity::named("carol");

    net.apply(alice.connect(&bob, None, net.now())).await;

    // carol does not exist yet
    let report = alice.report(&bob, "replaced", Some(&carol), net.now());
    let failed = net.submit(report.clone()).await;
    assert_eq!(failure_kind(&failed), ErrorKind::NotFound);

    net.apply(alice.connect(&carol, None, net.now())).await;
    let applied = net.submit(report).await;
    assert_eq!(applied.state, OperationState::Applied);
    assert_eq!(applied.hash, failed.hash);

    let record = net.engine.operation_status(&applied.hash).await.unwrap().unwrap();
    assert_eq!(record.state, OperationState::Applied);

    let outbound = net
        .engine
        .connections(&alice.id(), Direction::Outbound)
        .await
        .unwrap();
    let to_bob = outbound.iter().find(|c| c.id == bob.id()).unwrap();
    assert_eq!(to_bob.level, ConnectionLevel::Reported);
    assert_eq!(to_bob.replaced_with, Some(carol.id()));
}

#[tokio::test]
async fn test_foreign_signature_is_rejected() {
    let net = TestNet::new();
    let alice = TestIdentity::named("alice");
    let bob = TestIdentity::named("bob");
    let mallory = TestIdentity::named("mallory");

    let forged = sign(alice.connect(&bob, None, net.now()), &mallory.keypair);
    let outcome = net.submit(forged).await;
    assert_eq!(failure_kind(&outcome), ErrorKind::InvalidSignature);

    assert!(net.engine.user_view(&alice.id()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_version_timestamp_and_hash_checks() {
    let net = TestNet::new();
    let alice = TestIdentity::named("alice");
    let bob = TestIdentity::named("bob");

    let mut old = alice.connect(&bob, None, net.now());
    old.v = 4;
    let old = sign(old, &alice.keypair);
    assert_eq!(
        failure_kind(&net.submit(old).await),
        ErrorKind::InvalidVersion
    );

    let future = alice.connect(&bob, None, net.now() + 2 * HOUR);
    assert_eq!(
        failure_kind(&net.submit(future).await),
        ErrorKind::InvalidTimestamp
    );

    let op = alice
        .connect(&bob, None, net.now())
        .with_block_time(net.now());
    let other = alice.add_membership("g", net.now());
    let wrong = operation_hash(&other).unwrap();
    let outcome = net.engine.apply_operation(wrong, op).await.unwrap();
    assert_eq!(outcome.hash, wrong);
    assert_eq!(failure_kind(&outcome), ErrorKind::InvalidHash);
}

#[tokio::test]
async fn test_missing_block_time_fails() {
    let net = TestNet::new();
    let alice = TestIdentity::named("alice");
    let bob = TestIdentity::named("bob");

    let op = alice.connect(&bob, None, net.now());
    let hash = operation_hash(&op).unwrap();
    let outcome = net.engine.apply_operation(hash, op).await.unwrap();
    assert_eq!(failure_kind(&outcome), ErrorKind::Malformed);
}

#[tokio::test]
async fn test_link_for_unknown_context_is_ignored() {
    let net = TestNet::new();
    let alice = TestIdentity::named("alice");

    let outcome = net.submit(alice.link("nowhere", "cid", net.now())).await;
    assert_eq!(outcome.state, OperationState::Ignored);
    assert!(outcome.result.is_none());

    let record = net.engine.operation_status(&outcome.hash).await.unwrap().unwrap();
    assert_eq!(record.state, OperationState::Ignored);
}

#[tokio::test]
async fn test_sealed_link_is_opened_and_stored_sealed() {
    let net = TestNet::new();
    net.register_context("vault", false, Some("s3cret")).await;
    let alice = TestIdentity::named("alice");

    let plain = alice.link("vault", "user-1", net.now());
    let sealed = alice.sealed_link("vault", "s3cret", "user-1", net.now());
    assert!(sealed.op.is_sealed_link());

    let outcome = net.submit(sealed).await;
    assert_eq!(outcome.state, OperationState::Applied);
    assert_eq!(outcome.hash, operation_hash(&plain).unwrap());

    let owner = net.engine.user_by_context_id("vault", "user-1").await.unwrap();
    assert_eq!(owner, Some(alice.id()));

    let record = net.engine.operation_status(&outcome.hash).await.unwrap().unwrap();
    match &record.operation.op {
        Operation::LinkContextId {
            id,
            context_id,
            encrypted,
            ..
        } => {
            assert!(id.is_none());
            assert!(context_id.is_none());
            assert!(encrypted.is_some());
        }
        other => panic!("unexpected operation {other:?}"),
    }
}

#[tokio::test]
async fn test_plain_link_to_secret_context_is_stored_sealed() {
    let net = TestNet::new();
    net.register_context("vault", false, Some("s3cret")).await;
    let alice = TestIdentity::named("alice");

    let outcome = net.submit(alice.link("vault", "user-1", net.now())).await;
    assert_eq!(outcome.state, OperationState::Applied);

    let record = net.engine.operation_status(&outcome.hash).await.unwrap().unwrap();
    assert!(record.operation.op.is_sealed_link());
}

#[tokio::test]
async fn test_settled_links_to_secret_context_are_recorded_sealed() {
    let net = TestNet::new();
    net.register_context("vault", false, Some("s3cret")).await;
    let alice = TestIdentity::named("alice");
    let bob = TestIdentity::named("bob");

    let applied = net.submit(alice.link("vault", "user-1", net.now())).await;
    assert_eq!(applied.state, OperationState::Applied);
    let failed = net.submit(bob.link("vault", "user-1", net.now())).await;
    assert_eq!(failure_kind(&failed), ErrorKind::AlreadyExists);

    for hash in [applied.hash, failed.hash] {
        let record = net.engine.operation_status(&hash).await.unwrap().unwrap();
        assert!(record.operation.op.is_sealed_link());
    }
    let again = net.submit(alice.link("vault", "user-1", net.now())).await;
    assert_eq!(again.state, OperationState::Duplicate);
}

#[tokio::test]
async fn test_unopenable_seal_fails() {
    let net = TestNet::new();
    net.register_context("vault", false, Some("s3cret")).await;
    let alice = TestIdentity::named("alice");

    let op = alice.sealed_link("vault", "wrong-secret", "user-1", net.now());
    let submitted = operation_hash(&op).unwrap();
    let op = op.with_block_time(net.now());

    let outcome = net.engine.apply_operation(submitted, op).await.unwrap();
    assert_eq!(outcome.hash, submitted);
    assert_eq!(failure_kind(&outcome), ErrorKind::Malformed);
}

#[tokio::test]
async fn test_admission_buckets() {
    let mut config = EngineConfig::default();
    config.rate_limit.limit = 1;
    let net = TestNet::with_config(config);

    let alice = TestIdentity::named("alice");
    let bob = TestIdentity::named("bob");
    let stranger = TestIdentity::named("stranger");
    let other = TestIdentity::named("other");

    net.engine.add_verification(&alice.id(), "BrightID").await.unwrap();
    // alice is verified, so she becomes bob's parent
    net.apply(alice.connect(&bob, None, net.now())).await;
    let user = net.engine.user_view(&bob.id()).await.unwrap().unwrap();
    assert_eq!(user.parent, Some(alice.id()));

    // Unknown identities share one bucket.
    net.engine
        .admit(&stranger.connect(&alice, None, net.now()))
        .await
        .unwrap();
    let err = net
        .engine
        .admit(&other.connect(&alice, None, net.now()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);

    // Verified identities and their children have their own.
    net.engine
        .admit(&alice.connect(&bob, None, net.now()))
        .await
        .unwrap();
    net.engine
        .admit(&bob.connect(&alice, None, net.now()))
        .await
        .unwrap();
    let err = net
        .engine
        .admit(&bob.connect(&alice, None, net.now()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RateLimited);

    net.advance(2 * 60 * 1000);
    net.engine
        .admit(&other.connect(&alice, None, net.now()))
        .await
        .unwrap();
}
