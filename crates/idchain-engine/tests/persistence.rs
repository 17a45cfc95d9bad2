//! Settlement on the SQLite backend across restarts.

mod common;

use std::path::Path;
use std::sync::Arc;

use common::DAY;
use idchain_core::{operation_hash, ConnectionLevel, OperationState, SignedOperation};
use idchain_engine::{Direction, Engine, EngineConfig, FixedClock, OperationOutcome};
use idchain_store::SqliteStore;
use idchain_testkit::{TestIdentity, GENESIS};

fn open(path: &Path, clock: &Arc<FixedClock>) -> anyhow::Result<Engine<SqliteStore>> {
    let store = SqliteStore::open(path)?;
    Ok(Engine::with_clock(store, EngineConfig::default(), clock.clone()))
}

async fn settle(
    engine: &Engine<SqliteStore>,
    op: SignedOperation,
    block_time: i64,
) -> anyhow::Result<OperationOutcome> {
    let op = op.with_block_time(block_time);
    let hash = operation_hash(&op)?;
    Ok(engine.apply_operation(hash, op).await?)
}

#[tokio::test]
async fn test_applied_hashes_survive_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("graph.db");
    let clock = Arc::new(FixedClock::new(GENESIS));
    let alice = TestIdentity::named("alice");
    let bob = TestIdentity::named("bob");
    let op = alice.connect(&bob, Some(ConnectionLevel::AlreadyKnown), GENESIS);

    {
        let engine = open(&path, &clock)?;
        let outcome = settle(&engine, op.clone(), GENESIS).await?;
        assert_eq!(outcome.state, OperationState::Applied);
    }

    let engine = open(&path, &clock)?;
    let outcome = settle(&engine, op, GENESIS).await?;
    assert_eq!(outcome.state, OperationState::Duplicate);

    let outbound = engine.connections(&alice.id(), Direction::Outbound).await?;
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[0].level, ConnectionLevel::AlreadyKnown);
    Ok(())
}

#[tokio::test]
async fn test_expiry_is_judged_on_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("graph.db");
    let clock = Arc::new(FixedClock::new(GENESIS));
    let alice = TestIdentity::named("alice");
    let bob = TestIdentity::named("bob");
    let carol = TestIdentity::named("carol");

    {
        let engine = open(&path, &clock)?;
        let outcome = settle(&engine, alice.set_trusted(&[&bob, &carol], GENESIS), GENESIS).await?;
        assert_eq!(outcome.state, OperationState::Applied);
        let downgrade = alice.connect(&carol, Some(ConnectionLevel::JustMet), GENESIS + 1);
        settle(&engine, downgrade, GENESIS + 1).await?;
    }

    clock.advance(8 * DAY);
    let engine = open(&path, &clock)?;
    let recovery = engine.recovery_connections(&alice.id()).await?;
    assert_eq!(recovery, vec![bob.id()]);
    Ok(())
}
