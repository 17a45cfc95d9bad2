//! Operation verification.
//!
//! Checks run in a fixed order: protocol version, clock skew, shape,
//! signatures, then the content hash. Signature checks need graph state
//! (current key sets, recovery connections, app keys), which is why this
//! lives in the engine rather than in core.

use idchain_core::canonical::{canonical_message, request_proof_message};
use idchain_core::{
    check_hash, check_recovery_signers, check_timestamp, check_version, validate_structure,
    verify_with_keys, IdentityId, OpHash, Operation, PublicKey, Signature, SignedOperation,
};
use idchain_store::Store;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::trust;

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    /// Canonical message the signatures cover.
    pub message: String,
    /// Key that produced the primary signature, when an identity signed.
    pub signing_key: Option<PublicKey>,
}

/// Verifies operations against the current graph.
pub struct Verifier<'a, S: Store> {
    graph: &'a Graph<S>,
    config: &'a EngineConfig,
}

impl<'a, S: Store> Verifier<'a, S> {
    pub fn new(graph: &'a Graph<S>, config: &'a EngineConfig) -> Self {
        Self { graph, config }
    }

    /// Verify an operation claimed to hash to `hash`.
    ///
    /// `now` bounds the client timestamp; `block_time` anchors recovery
    /// connection ages so every node reaches the same verdict.
    pub async fn verify(
        &self,
        hash: &OpHash,
        op: &SignedOperation,
        now: i64,
        block_time: i64,
    ) -> Result<Verified> {
        check_version(op, self.config.protocol.version)?;
        check_timestamp(op, now, self.config.protocol.clock_skew_ms)?;
        validate_structure(op)?;

        let message = canonical_message(op)?;
        let signing_key = self.verify_signatures(op, &message, block_time).await?;
        check_hash(op, hash)?;

        Ok(Verified {
            message,
            signing_key,
        })
    }

    async fn verify_signatures(
        &self,
        op: &SignedOperation,
        message: &str,
        block_time: i64,
    ) -> Result<Option<PublicKey>> {
        let key = match &op.op {
            Operation::Sponsor { app, sig, .. } => {
                self.verify_app(app.as_str(), message, sig).await?;
                return Ok(None);
            }
            Operation::SetSigningKey {
                id,
                id1,
                id2,
                sig1,
                sig2,
                ..
            } => {
                let history = self.graph.connection_history(id).await?;
                let recovery =
                    trust::recovery_connections(&history, block_time, &self.config.recovery);
                check_recovery_signers(id1, id2, &recovery)?;
                let key = self.verify_user(id1, message, sig1).await?;
                self.verify_user(id2, message, sig2).await?;
                key
            }
            Operation::AddConnection {
                id1,
                id2,
                sig1,
                sig2,
            } => {
                let key = self.verify_user(id1, message, sig1).await?;
                self.verify_user(id2, message, sig2).await?;
                key
            }
            Operation::Connect {
                id1,
                id2,
                request_proof,
                sig1,
                ..
            } => {
                let key = self.verify_user(id1, message, sig1).await?;
                if let Some(proof) = request_proof {
                    let proof_message = request_proof_message(id2.as_str(), op.timestamp);
                    self.verify_user(id2, &proof_message, proof).await?;
                }
                key
            }
            Operation::RemoveConnection { id1, sig1, .. } | Operation::AddGroup { id1, sig1, .. } => {
                self.verify_user(id1, message, sig1).await?
            }
            Operation::LinkContextId { id, sig, .. } => {
                let id = id.as_ref().ok_or_else(|| {
                    EngineError::Malformed("link must be opened before verification".into())
                })?;
                self.verify_user(id, message, sig).await?
            }
            Operation::Invite { inviter, sig, .. } => self.verify_user(inviter, message, sig).await?,
            Operation::Dismiss { dismisser, sig, .. } => {
                self.verify_user(dismisser, message, sig).await?
            }
            Operation::RemoveGroup { id, sig, .. }
            | Operation::AddMembership { id, sig, .. }
            | Operation::RemoveMembership { id, sig, .. }
            | Operation::SetTrustedConnections { id, sig, .. }
            | Operation::AddAdmin { id, sig, .. }
            | Operation::AddSigningKey { id, sig, .. }
            | Operation::RemoveSigningKey { id, sig, .. }
            | Operation::RemoveAllSigningKeys { id, sig }
            | Operation::UpdateGroup { id, sig, .. } => self.verify_user(id, message, sig).await?,
        };
        Ok(Some(key))
    }

    /// Verify a signature against the signer's current keys.
    async fn verify_user(
        &self,
        signer: &IdentityId,
        message: &str,
        sig: &Signature,
    ) -> Result<PublicKey> {
        let keys = self.graph.signing_keys(signer).await?;
        Ok(verify_with_keys(signer, message.as_bytes(), sig, &keys)?)
    }

    async fn verify_app(&self, app: &str, message: &str, sig: &Signature) -> Result<()> {
        let record = self
            .graph
            .app(app)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("app {app}")))?;
        let key = record.sponsor_public_key.ok_or_else(|| {
            EngineError::InvalidSignature(format!("app {app} has no sponsor key"))
        })?;
        key.verify(message.as_bytes(), sig)
            .map_err(|_| EngineError::InvalidSignature(format!("sponsor signature of app {app}")))
    }
}
