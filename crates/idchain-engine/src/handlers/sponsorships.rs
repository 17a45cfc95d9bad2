//! Sponsorship handlers.
//!
//! An app sponsors an identity directly, or relays a request for a context
//! id. A relayed request for an id nobody linked yet reserves a placeholder
//! that the link consumes; once linked, the node builds a direct "Sponsor"
//! operation signed with the app's key and queues it for broadcast.

use idchain_core::canonical::canonical_message;
use idchain_core::{
    hash_message, AppRecord, IdentityId, Keypair, OpHash, Operation, OperationRecord,
    OperationState, Signature, SignedOperation,
};
use idchain_store::{EdgeId, Store};
use serde_json::{json, Value};

use super::ApplyContext;
use crate::error::{EngineError, Result};

/// Action name of sponsorship test markers.
pub const TESTBLOCK_ACTION: &str = "sponsorship";

/// Sponsor `id`, or relay a sponsorship for `context_id`.
pub async fn sponsor<S: Store>(
    ctx: &ApplyContext<'_, S>,
    app: &str,
    id: Option<&IdentityId>,
    context_id: Option<&str>,
) -> Result<Option<Value>> {
    let graph = ctx.graph;
    let record = graph
        .app(app)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("app {app}")))?;
    graph.purge_expired_placeholders(app, ctx.block_time).await?;

    match (id, context_id) {
        (Some(id), _) => {
            ensure_capacity(ctx, &record).await?;
            if graph.is_sponsored(id).await? {
                return Err(already_sponsored(id));
            }
            assign(ctx, &record, id).await?;
            tracing::debug!(%id, app, "identity sponsored");
            Ok(None)
        }
        (None, Some(context_id)) => relay(ctx, &record, context_id).await,
        (None, None) => Err(EngineError::Malformed(
            "sponsor needs an id or a contextId".into(),
        )),
    }
}

/// Fail unless the app has a sponsorship that is neither assigned nor
/// reserved by a placeholder.
async fn ensure_capacity<S: Store>(ctx: &ApplyContext<'_, S>, app: &AppRecord) -> Result<()> {
    let assigned = ctx.graph.sponsorships_assigned(app.id.as_str()).await?;
    if assigned + reserved(ctx, app).await? >= app.total_sponsorships {
        return Err(exhausted(app));
    }
    Ok(())
}

async fn reserved<S: Store>(ctx: &ApplyContext<'_, S>, app: &AppRecord) -> Result<u64> {
    Ok(ctx
        .graph
        .pending_sponsorships_of(app.id.as_str(), ctx.block_time)
        .await?
        .len() as u64)
}

/// Record the sponsorship of `id`.
///
/// Sponsorships of one app may land concurrently after each passed the
/// capacity check; the one recorded past the app's total is undone.
async fn assign<S: Store>(
    ctx: &ApplyContext<'_, S>,
    app: &AppRecord,
    id: &IdentityId,
) -> Result<EdgeId> {
    let graph = ctx.graph;
    let Some(edge) = graph
        .insert_sponsorship(id, app.id.as_str(), ctx.block_time)
        .await?
    else {
        return Err(already_sponsored(id));
    };
    let rank = graph.sponsorship_rank(app.id.as_str(), edge).await?;
    if rank + reserved(ctx, app).await? > app.total_sponsorships {
        graph.remove_sponsorship(id, edge).await?;
        return Err(exhausted(app));
    }
    Ok(edge)
}

async fn relay<S: Store>(
    ctx: &ApplyContext<'_, S>,
    app: &AppRecord,
    context_id: &str,
) -> Result<Option<Value>> {
    let graph = ctx.graph;
    let (Some(secret), Some(context_name)) = (&app.sponsor_private_key, &app.context) else {
        return Err(EngineError::AccessDenied(format!(
            "app {} cannot relay sponsor requests",
            app.id
        )));
    };
    let context = graph
        .context(context_name)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("context {context_name}")))?;
    let context_id = if context.ids_as_hex {
        context_id.to_lowercase()
    } else {
        context_id.to_owned()
    };
    graph
        .remove_testblocks(&context_id, TESTBLOCK_ACTION, Some(app.id.as_str()))
        .await?;

    let Some(id) = graph.link_owner(&context.name, &context_id).await? else {
        // A repeated request keeps the placeholder it already holds.
        let existing = graph.pending_sponsorship(&context_id, ctx.block_time).await?;
        if existing.map_or(true, |p| p.app != app.id.as_str()) {
            ensure_capacity(ctx, app).await?;
            let expires_at = ctx.block_time + ctx.config.sponsorship.placeholder_ttl_ms;
            graph
                .insert_pending_sponsorship(&context_id, app.id.as_str(), ctx.block_time, expires_at)
                .await?;
        }
        tracing::debug!(app = %app.id, context_id, "sponsorship reserved until link");
        return Ok(Some(json!({ "pending": context_id })));
    };

    ensure_capacity(ctx, app).await?;
    if graph.is_sponsored(&id).await? {
        return Err(already_sponsored(&id));
    }
    let edge = assign(ctx, app, &id).await?;
    let hash = match queue_direct_sponsor(ctx, app, secret, &id).await {
        Ok(hash) => hash,
        Err(e) => {
            graph.remove_sponsorship(&id, edge).await?;
            return Err(e);
        }
    };
    tracing::info!(app = %app.id, %id, %hash, "relayed sponsorship queued for broadcast");
    Ok(Some(json!({ "relayed": hash })))
}

fn already_sponsored(id: &IdentityId) -> EngineError {
    EngineError::AlreadyExists(format!("{id} is already sponsored"))
}

fn exhausted(app: &AppRecord) -> EngineError {
    EngineError::CapacityExhausted(format!("app {} has no unused sponsorships", app.id))
}

/// Build, sign and queue the direct sponsor operation other nodes apply.
async fn queue_direct_sponsor<S: Store>(
    ctx: &ApplyContext<'_, S>,
    app: &AppRecord,
    secret: &str,
    id: &IdentityId,
) -> Result<OpHash> {
    let keypair = Keypair::from_secret_base64(secret)?;
    let mut op = SignedOperation::new(
        Operation::Sponsor {
            app: app.id.clone(),
            id: Some(id.clone()),
            context_id: None,
            sig: Signature::ZERO,
        },
        ctx.block_time,
    );
    op.v = ctx.config.protocol.version;

    let message = canonical_message(&op)?;
    if let Operation::Sponsor { sig, .. } = &mut op.op {
        *sig = keypair.sign(message.as_bytes());
    }
    let hash = hash_message(&message);

    ctx.ledger
        .queue_broadcast(&OperationRecord {
            hash,
            operation: op,
            state: OperationState::Init,
            result: None,
        })
        .await?;
    Ok(hash)
}
