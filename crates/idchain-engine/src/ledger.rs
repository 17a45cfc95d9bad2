//! The operation ledger.
//!
//! Every operation the engine sees gets a record keyed by its hash, with
//! its final state and result. The set of applied hashes is kept apart from
//! the records: only an applied hash makes a later submission a duplicate,
//! so a failed operation may be resubmitted.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use idchain_core::{OpHash, OperationRecord, OperationState};
use idchain_store::{Collection, InsertResult, Store, StoreExt};
use serde_json::{json, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::Result;

/// Hash-keyed operation records.
pub struct Ledger<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Ledger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Whether an operation with this hash was already applied.
    pub async fn is_applied(&self, hash: &OpHash) -> Result<bool> {
        Ok(self
            .store
            .exists(Collection::OperationHashes, &hash.to_base64())
            .await?)
    }

    /// Remember an applied hash. Returns `false` if it was already known.
    pub async fn mark_applied(&self, hash: &OpHash, block_time: i64) -> Result<bool> {
        let result = self
            .store
            .insert(
                Collection::OperationHashes,
                &hash.to_base64(),
                json!({ "blockTime": block_time }),
            )
            .await?;
        Ok(result == InsertResult::Inserted)
    }

    /// Insert or overwrite a record.
    pub async fn record(&self, record: &OperationRecord) -> Result<()> {
        Ok(self
            .store
            .put_as(Collection::Operations, &record.hash.to_base64(), record)
            .await?)
    }

    pub async fn get(&self, hash: &OpHash) -> Result<Option<OperationRecord>> {
        Ok(self
            .store
            .get_as(Collection::Operations, &hash.to_base64())
            .await?)
    }

    /// Record a locally built operation and queue it for broadcast.
    pub async fn queue_broadcast(&self, record: &OperationRecord) -> Result<()> {
        self.record(record).await?;
        self.store
            .replace(Collection::Outbox, &record.hash.to_base64(), json!({}))
            .await?;
        Ok(())
    }

    /// Queued operations still waiting to be broadcast.
    pub async fn pending_broadcasts(&self) -> Result<Vec<OperationRecord>> {
        let mut pending = Vec::new();
        for key in self.store.keys(Collection::Outbox).await? {
            let record: Option<OperationRecord> =
                self.store.get_as(Collection::Operations, &key).await?;
            match record {
                Some(record) if record.state == OperationState::Init => pending.push(record),
                Some(_) | None => {
                    self.store.remove(Collection::Outbox, &key).await?;
                }
            }
        }
        Ok(pending)
    }

    /// Move a queued operation from `init` to `sent`.
    ///
    /// Returns `false` if the hash was not waiting for broadcast.
    pub async fn mark_sent(&self, hash: &OpHash) -> Result<bool> {
        let key = hash.to_base64();
        if !self.store.remove(Collection::Outbox, &key).await? {
            return Ok(false);
        }
        let init = Value::String(OperationState::Init.as_str().to_owned());
        let sent = Value::String(OperationState::Sent.as_str().to_owned());
        Ok(self
            .store
            .update(
                Collection::Operations,
                &key,
                Box::new(move |doc| {
                    if doc["state"] == init {
                        doc["state"] = sent;
                    }
                }),
            )
            .await?)
    }

    /// Number of records per state.
    pub async fn state_counts(&self) -> Result<BTreeMap<&'static str, usize>> {
        let mut counts = BTreeMap::new();
        for key in self.store.keys(Collection::Operations).await? {
            let record: Option<OperationRecord> =
                self.store.get_as(Collection::Operations, &key).await?;
            if let Some(record) = record {
                *counts.entry(record.state.as_str()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

/// Per-hash mutual exclusion.
///
/// Two concurrent submissions of one hash serialize, so exactly one of
/// them applies and the other observes a duplicate.
#[derive(Default)]
pub struct HashLocks {
    locks: Arc<DashMap<OpHash, Arc<Mutex<()>>>>,
}

impl HashLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, hash: OpHash) -> HashGuard {
        let lock = Arc::clone(self.locks.entry(hash).or_default().value());
        let guard = lock.lock_owned().await;
        HashGuard {
            hash,
            locks: Arc::clone(&self.locks),
            _guard: guard,
        }
    }

    /// Number of hashes currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held while an operation hash is being settled.
pub struct HashGuard {
    hash: OpHash,
    locks: Arc<DashMap<OpHash, Arc<Mutex<()>>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for HashGuard {
    fn drop(&mut self) {
        // The map and this guard hold the only references when nobody waits.
        self.locks
            .remove_if(&self.hash, |_, lock| Arc::strong_count(lock) <= 2);
    }
}
