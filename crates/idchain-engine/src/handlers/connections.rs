//! Connection handlers.

use idchain_core::{ConnectionLevel, ConnectionRecord, IdentityId, Signature, REPLACED_REASON};
use idchain_store::Store;

use super::ApplyContext;
use crate::error::{EngineError, Result};

pub struct ConnectArgs<'a> {
    pub id1: &'a IdentityId,
    pub id2: &'a IdentityId,
    pub level: Option<ConnectionLevel>,
    pub report_reason: Option<&'a str>,
    pub replaced_with: Option<&'a IdentityId>,
    pub request_proof: Option<Signature>,
}

/// Set the directed connection `id1 -> id2`, creating either identity if
/// needed.
///
/// Without an explicit level the current one is kept, or "just met" for a
/// new connection. A report reason only survives on a reported connection,
/// and a replacement only with the "replaced" reason.
pub async fn connect<S: Store>(ctx: &ApplyContext<'_, S>, args: ConnectArgs<'_>) -> Result<()> {
    let ConnectArgs {
        id1,
        id2,
        level,
        report_reason,
        replaced_with,
        request_proof,
    } = args;
    let graph = ctx.graph;

    let current = graph.connection(id1, id2).await?;
    let level = level
        .or_else(|| current.as_ref().map(|c| c.level()))
        .unwrap_or(ConnectionLevel::JustMet);
    let report_reason = report_reason.filter(|_| level == ConnectionLevel::Reported);
    let replaced_with = replaced_with.filter(|_| report_reason == Some(REPLACED_REASON));

    if let Some(replacement) = replaced_with {
        if replacement == id2 {
            return Err(EngineError::InvariantViolation(format!(
                "{id2} cannot be replaced by itself"
            )));
        }
        if !graph.user_exists(replacement).await? {
            return Err(EngineError::NotFound(format!("identity {replacement}")));
        }
    }

    graph.ensure_user(id1, ctx.block_time).await?;
    graph.ensure_user(id2, ctx.block_time).await?;

    let id2_has_parent = graph
        .user(id2)
        .await?
        .is_some_and(|user| user.parent.is_some());
    if !id2_has_parent && graph.is_verified(id1, &ctx.config.trusted_verification).await? {
        graph.set_parent_if_absent(id2, id1).await?;
    }

    let record = ConnectionRecord {
        level,
        report_reason: report_reason.map(str::to_owned),
        replaced_with: replaced_with.cloned(),
        request_proof,
    };
    graph
        .upsert_connection(id1, id2, &record, ctx.block_time)
        .await?;

    tracing::debug!(%id1, %id2, level = level.as_str(), "connection set");
    Ok(())
}

/// Mutual connection at the current (or default) level in both directions.
pub async fn add_connection<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id1: &IdentityId,
    id2: &IdentityId,
) -> Result<()> {
    for (from, to) in [(id1, id2), (id2, id1)] {
        connect(
            ctx,
            ConnectArgs {
                id1: from,
                id2: to,
                level: None,
                report_reason: None,
                replaced_with: None,
                request_proof: None,
            },
        )
        .await?;
    }
    Ok(())
}

/// Report `id2`.
pub async fn remove_connection<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id1: &IdentityId,
    id2: &IdentityId,
    reason: Option<&str>,
) -> Result<()> {
    connect(
        ctx,
        ConnectArgs {
            id1,
            id2,
            level: Some(ConnectionLevel::Reported),
            report_reason: reason,
            replaced_with: None,
            request_proof: None,
        },
    )
    .await
}

/// Mark each of `trusted` as a recovery connection of `id`.
pub async fn set_trusted_connections<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id: &IdentityId,
    trusted: &[IdentityId],
) -> Result<()> {
    for other in trusted {
        if other == id {
            continue;
        }
        connect(
            ctx,
            ConnectArgs {
                id1: id,
                id2: other,
                level: Some(ConnectionLevel::Recovery),
                report_reason: None,
                replaced_with: None,
                request_proof: None,
            },
        )
        .await?;
    }
    Ok(())
}
