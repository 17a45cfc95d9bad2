//! Graph mutations, one handler per operation kind.
//!
//! Handlers run after verification and see only the block time, never the
//! node clock, so every node derives the same graph. Each handler checks
//! all its preconditions before it writes anything.

pub mod connections;
pub mod groups;
pub mod keys;
pub mod links;
pub mod sponsorships;

use idchain_core::{Operation, SignedOperation};
use idchain_store::Store;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::ledger::Ledger;
use crate::verifier::Verified;

/// What a handler may touch while applying one operation.
pub struct ApplyContext<'a, S: Store> {
    pub graph: &'a Graph<S>,
    pub ledger: &'a Ledger<S>,
    pub config: &'a EngineConfig,
    /// Consensus time of the operation.
    pub block_time: i64,
}

/// Apply a verified operation. Returns the operation's result, if any.
pub async fn dispatch<S: Store>(
    ctx: &ApplyContext<'_, S>,
    op: &SignedOperation,
    verified: &Verified,
) -> Result<Option<Value>> {
    match &op.op {
        Operation::Connect {
            id1,
            id2,
            level,
            report_reason,
            replaced_with,
            request_proof,
            ..
        } => {
            connections::connect(
                ctx,
                connections::ConnectArgs {
                    id1,
                    id2,
                    level: *level,
                    report_reason: report_reason.as_deref(),
                    replaced_with: replaced_with.as_ref(),
                    request_proof: *request_proof,
                },
            )
            .await?
        }
        Operation::AddConnection { id1, id2, .. } => {
            connections::add_connection(ctx, id1, id2).await?
        }
        Operation::RemoveConnection {
            id1, id2, reason, ..
        } => connections::remove_connection(ctx, id1, id2, reason.as_deref()).await?,
        Operation::SetTrustedConnections { id, trusted, .. } => {
            connections::set_trusted_connections(ctx, id, trusted).await?
        }
        Operation::AddGroup {
            group,
            id1,
            id2,
            invite_data2,
            id3,
            invite_data3,
            url,
            group_type,
            ..
        } => {
            groups::add_group(
                ctx,
                groups::NewGroup {
                    group,
                    founder: id1,
                    co_founders: [
                        (id2, invite_data2.as_deref()),
                        (id3, invite_data3.as_deref()),
                    ],
                    url: url.as_deref(),
                    group_type: *group_type,
                },
            )
            .await?
        }
        Operation::RemoveGroup { id, group, .. } => groups::remove_group(ctx, id, group).await?,
        Operation::AddMembership { id, group, .. } => {
            groups::add_membership(ctx, id, group).await?
        }
        Operation::RemoveMembership { id, group, .. } => {
            groups::remove_membership(ctx, id, group).await?
        }
        Operation::Invite {
            inviter,
            invitee,
            group,
            data,
            ..
        } => groups::invite(ctx, inviter, invitee, group, data.as_deref()).await?,
        Operation::Dismiss {
            dismisser,
            dismissee,
            group,
            ..
        } => groups::dismiss(ctx, dismisser, dismissee, group).await?,
        Operation::AddAdmin {
            id, admin, group, ..
        } => groups::add_admin(ctx, id, admin, group).await?,
        Operation::UpdateGroup { id, group, url, .. } => {
            groups::update_group(ctx, id, group, url.as_deref()).await?
        }
        Operation::SetSigningKey {
            id, signing_key, ..
        } => keys::set_signing_key(ctx, id, signing_key).await?,
        Operation::AddSigningKey {
            id, signing_key, ..
        } => keys::add_signing_key(ctx, id, signing_key).await?,
        Operation::RemoveSigningKey {
            id, signing_key, ..
        } => keys::remove_signing_key(ctx, id, signing_key).await?,
        Operation::RemoveAllSigningKeys { id, .. } => {
            let key = verified.signing_key.as_ref().ok_or_else(|| {
                EngineError::InvalidSignature("no key signed the request".into())
            })?;
            keys::remove_all_signing_keys(ctx, id, key).await?
        }
        Operation::LinkContextId {
            id: Some(id),
            context,
            context_id: Some(context_id),
            ..
        } => return links::link_context_id(ctx, id, context, context_id).await,
        Operation::LinkContextId { .. } => {
            return Err(EngineError::Malformed(
                "link must be opened before it is applied".into(),
            ))
        }
        Operation::Sponsor {
            app,
            id,
            context_id,
            ..
        } => {
            return sponsorships::sponsor(ctx, app.as_str(), id.as_ref(), context_id.as_deref())
                .await
        }
    }
    Ok(None)
}
