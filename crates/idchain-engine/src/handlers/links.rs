//! Context-id linking.

use idchain_core::IdentityId;
use idchain_store::Store;
use serde_json::Value;

use super::{sponsorships, ApplyContext};
use crate::error::{EngineError, ErrorKind, Result};
use crate::graph::LinkClaim;

/// Action name of link test markers.
pub const TESTBLOCK_ACTION: &str = "link";

/// Bind `context_id` to `id` within `context`.
///
/// A context id belongs to one identity. Re-linking an id the identity
/// already holds only refreshes its timestamp; new ids are capped per
/// trailing window. A sponsorship reserved for the id is consumed.
pub async fn link_context_id<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id: &IdentityId,
    context: &str,
    context_id: &str,
) -> Result<Option<Value>> {
    let graph = ctx.graph;
    let record = graph
        .context(context)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("context {context}")))?;
    let context_id = if record.ids_as_hex {
        context_id.to_lowercase()
    } else {
        context_id.to_owned()
    };

    // Test markers are cleared by any link attempt, accepted or not.
    graph
        .remove_testblocks(&context_id, TESTBLOCK_ACTION, None)
        .await?;

    if let Some(owner) = graph.link_owner(context, &context_id).await? {
        if &owner != id {
            return Err(linked_elsewhere(context));
        }
    }

    let links = graph.links_of(id, context).await?;
    if let Some(link) = links.iter().find(|l| l.context_id == context_id) {
        if ctx.block_time > link.timestamp {
            graph.touch_link(link, ctx.block_time).await?;
        }
        return Ok(None);
    }

    let recent = links
        .iter()
        .filter(|l| ctx.block_time - l.timestamp < ctx.config.links.window_ms)
        .count();
    if recent >= ctx.config.links.max_per_window {
        return Err(EngineError::RateLimited(format!(
            "only {} new links per {}ms are allowed in {context}",
            ctx.config.links.max_per_window, ctx.config.links.window_ms
        )));
    }

    match graph
        .insert_link(id, context, &context_id, ctx.block_time)
        .await?
    {
        LinkClaim::Linked => {}
        LinkClaim::Held(holder) if &holder == id => {
            // Claimed by a concurrent link of the same identity.
            return Ok(None);
        }
        LinkClaim::Held(_) => return Err(linked_elsewhere(context)),
    }
    tracing::debug!(%id, context, "context id linked");

    let Some(placeholder) = graph.pending_sponsorship(&context_id, ctx.block_time).await? else {
        return Ok(None);
    };
    graph.remove_pending_sponsorship(&placeholder).await?;

    match sponsorships::sponsor(ctx, &placeholder.app, None, Some(&context_id)).await {
        Ok(result) => Ok(result),
        // The link stands even if the reserved sponsorship cannot be used.
        Err(e) if e.kind() != ErrorKind::Internal => {
            tracing::warn!(%id, app = %placeholder.app, error = %e, "reserved sponsorship dropped");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn linked_elsewhere(context: &str) -> EngineError {
    EngineError::AlreadyExists(format!("contextId is linked to another identity in {context}"))
}
