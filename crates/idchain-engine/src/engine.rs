//! The Engine: settles consensus-ordered operations into the trust graph.
//!
//! Every node feeds the same operations, in block order, through
//! [`Engine::apply_operation`]. Each one is verified against the graph as
//! it stands, applied by its handler, and recorded in the ledger under its
//! content hash with a final state.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use idchain_cipher::{open_link, seal_link, LinkPayload};
use idchain_core::{
    operation_hash, AppRecord, ContextRecord, GroupId, IdentityId, OpHash, Operation,
    OperationRecord, OperationState, SignedOperation,
};
use idchain_store::Store;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::handlers::{self, ApplyContext};
use crate::ledger::{HashLocks, Ledger};
use crate::rate_limit::{parent_bucket, RateLimiter, SHARED_BUCKET};
use crate::trust;
use crate::verifier::Verifier;

/// Final disposition of one submitted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOutcome {
    /// Hash the operation was settled under.
    pub hash: OpHash,
    pub state: OperationState,
    /// Handler result when applied, error report when failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// The settlement engine.
///
/// Provides a unified API for:
/// - Applying consensus-ordered operations
/// - Looking up operation outcomes
/// - Admitting submissions under rate limits
/// - Draining locally built operations for broadcast
/// - Seeding apps, contexts and verifications
pub struct Engine<S: Store> {
    graph: Graph<S>,
    ledger: Ledger<S>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    locks: HashLocks,
}

impl<S: Store> Engine<S> {
    /// Create an engine on the system clock.
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create an engine with an explicit clock.
    pub fn with_clock(store: S, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(store);
        Self {
            graph: Graph::new(Arc::clone(&store)),
            ledger: Ledger::new(store),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            config,
            clock,
            locks: HashLocks::new(),
        }
    }

    pub fn graph(&self) -> &Graph<S> {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Apply Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Settle one operation delivered by consensus.
    ///
    /// Operation-level failures are recorded and returned as a `failed`
    /// outcome; `Err` is reserved for storage faults that prevent recording.
    #[tracing::instrument(skip(self, op), fields(name = op.name(), hash = %hash))]
    pub async fn apply_operation(
        &self,
        hash: OpHash,
        op: SignedOperation,
    ) -> Result<OperationOutcome> {
        let mut hash = hash;
        let mut op = op;
        let mut link_secret: Option<(String, String)> = None;

        let link_context = match &op.op {
            Operation::LinkContextId { context, .. } => Some(context.clone()),
            _ => None,
        };
        if let Some(name) = link_context {
            let Some(context) = self.graph.context(&name).await? else {
                tracing::debug!("link for unknown context ignored");
                return self.record(hash, op, OperationState::Ignored, None).await;
            };
            if op.op.is_sealed_link() {
                match open_sealed_link(&op, &context) {
                    Ok(opened) => {
                        hash = operation_hash(&opened)?;
                        op = opened;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "sealed link could not be opened");
                        let report = serde_json::to_value(e.report()).ok();
                        return self.record(hash, op, OperationState::Failed, report).await;
                    }
                }
            }
            link_secret = context.link_secret.map(|secret| (context.name, secret));
        }

        let _guard = self.locks.acquire(hash).await;

        if self.ledger.is_applied(&hash).await? {
            tracing::debug!("duplicate operation");
            return Ok(OperationOutcome {
                hash,
                state: OperationState::Duplicate,
                result: None,
            });
        }

        // Sealed before any state changes, so an applied hash always has
        // its record.
        let stored = match &link_secret {
            Some((context, secret)) => seal_link_operation(op.clone(), context, secret)?,
            None => op.clone(),
        };

        let (state, result) = match self.settle(&hash, &op).await {
            Ok(result) => {
                self.ledger
                    .mark_applied(&hash, op.block_time.unwrap_or_default())
                    .await?;
                tracing::info!("operation applied");
                (OperationState::Applied, result)
            }
            Err(e) => {
                tracing::warn!(kind = ?e.kind(), error = %e, "operation failed");
                (OperationState::Failed, serde_json::to_value(e.report()).ok())
            }
        };

        self.record(hash, stored, state, result).await
    }

    /// Verify and apply.
    async fn settle(&self, hash: &OpHash, op: &SignedOperation) -> Result<Option<Value>> {
        let block_time = op
            .block_time
            .ok_or_else(|| EngineError::Malformed("operation carries no block time".into()))?;

        let verified = Verifier::new(&self.graph, &self.config)
            .verify(hash, op, self.now_ms(), block_time)
            .await?;

        let ctx = ApplyContext {
            graph: &self.graph,
            ledger: &self.ledger,
            config: &self.config,
            block_time,
        };
        handlers::dispatch(&ctx, op, &verified).await
    }

    async fn record(
        &self,
        hash: OpHash,
        operation: SignedOperation,
        state: OperationState,
        result: Option<Value>,
    ) -> Result<OperationOutcome> {
        self.ledger
            .record(&OperationRecord {
                hash,
                operation,
                state,
                result: result.clone(),
            })
            .await?;
        Ok(OperationOutcome {
            hash,
            state,
            result,
        })
    }

    /// The ledger record of an operation, if it was ever seen.
    pub async fn operation_status(&self, hash: &OpHash) -> Result<Option<OperationRecord>> {
        self.ledger.get(hash).await
    }

    /// Number of ledger records per state.
    pub async fn ledger_state(&self) -> Result<BTreeMap<&'static str, usize>> {
        self.ledger.state_counts().await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Submission
    // ─────────────────────────────────────────────────────────────────────────

    /// Count a submission against its senders' rate-limit buckets.
    pub async fn admit(&self, op: &SignedOperation) -> Result<()> {
        let mut buckets = Vec::new();
        for sender in op.op.senders() {
            buckets.push(self.bucket_for(sender).await?);
        }
        self.limiter.admit(&buckets, self.now_ms())
    }

    async fn bucket_for(&self, sender: &str) -> Result<String> {
        let id = IdentityId::from(sender);
        let Some(user) = self.graph.user(&id).await? else {
            return Ok(SHARED_BUCKET.to_owned());
        };
        if self
            .graph
            .is_verified(&id, &self.config.trusted_verification)
            .await?
        {
            return Ok(sender.to_owned());
        }
        Ok(match user.parent {
            Some(parent) => parent_bucket(parent.as_str()),
            None => SHARED_BUCKET.to_owned(),
        })
    }

    /// Operations this node built that still need broadcasting.
    pub async fn pending_broadcasts(&self) -> Result<Vec<OperationRecord>> {
        self.ledger.pending_broadcasts().await
    }

    /// Mark a queued operation as broadcast.
    pub async fn mark_broadcast(&self, hash: &OpHash) -> Result<bool> {
        self.ledger.mark_sent(hash).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Graph Maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Recompute the groups an identity could join.
    ///
    /// Candidates are groups of identities connected to it that it does
    /// not belong to yet.
    pub async fn refresh_eligible_groups(&self, id: &IdentityId) -> Result<Vec<GroupId>> {
        let current: HashSet<GroupId> = self
            .graph
            .memberships(id)
            .await?
            .into_iter()
            .map(|m| m.group)
            .collect();

        let mut connected: BTreeMap<GroupId, usize> = BTreeMap::new();
        for connector in self.graph.connectors_of(id).await? {
            for membership in self.graph.memberships(&connector).await? {
                if !current.contains(&membership.group) {
                    *connected.entry(membership.group).or_insert(0) += 1;
                }
            }
        }

        let mut candidates = Vec::with_capacity(connected.len());
        for (group, count) in connected {
            let size = self.graph.members(&group).await?.len();
            candidates.push((group, count, size));
        }

        let groups = trust::eligible_groups(&candidates);
        self.graph.set_eligible_groups(id, &groups).await?;
        Ok(groups)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Seeding
    // ─────────────────────────────────────────────────────────────────────────

    /// Register or update a sponsoring app.
    pub async fn register_app(&self, app: &AppRecord) -> Result<()> {
        self.graph.put_app(app).await
    }

    /// Register or update a context.
    pub async fn register_context(&self, context: &ContextRecord) -> Result<()> {
        self.graph.put_context(context).await
    }

    /// Record a verification granted outside the operation pipeline.
    pub async fn add_verification(&self, id: &IdentityId, name: &str) -> Result<()> {
        self.graph.add_verification(id, name, self.now_ms()).await
    }

    /// Mark a context id for test traffic of an app.
    pub async fn add_testblock(&self, context_id: &str, app: &str, action: &str) -> Result<()> {
        self.graph
            .add_testblock(context_id, app, action, self.now_ms())
            .await
    }
}

/// Replace a sealed link with its opened form.
fn open_sealed_link(op: &SignedOperation, context: &ContextRecord) -> Result<SignedOperation> {
    let Operation::LinkContextId {
        encrypted: Some(sealed),
        sig,
        ..
    } = &op.op
    else {
        return Ok(op.clone());
    };
    let secret = context.link_secret.as_deref().ok_or_else(|| {
        EngineError::Malformed(format!("context {} does not accept sealed links", context.name))
    })?;
    let payload = open_link(&context.name, secret, sealed)
        .map_err(|e| EngineError::Malformed(format!("sealed link: {e}")))?;

    let mut opened = op.clone();
    opened.op = Operation::LinkContextId {
        id: Some(payload.id),
        context: context.name.clone(),
        context_id: Some(payload.context_id),
        encrypted: None,
        sig: *sig,
    };
    Ok(opened)
}

/// Hide a link's identity and context id before it is recorded.
fn seal_link_operation(op: SignedOperation, context: &str, secret: &str) -> Result<SignedOperation> {
    let Operation::LinkContextId {
        id: Some(id),
        context_id: Some(context_id),
        sig,
        ..
    } = &op.op
    else {
        return Ok(op);
    };
    let encrypted = seal_link(context, secret, &LinkPayload::new(id.clone(), context_id.clone()))?;

    let mut sealed = op.clone();
    sealed.op = Operation::LinkContextId {
        id: None,
        context: context.to_owned(),
        context_id: None,
        encrypted: Some(encrypted),
        sig: *sig,
    };
    Ok(sealed)
}
