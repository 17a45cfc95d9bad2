//! Signing key management.

use idchain_core::{IdentityId, PublicKey};
use idchain_store::Store;

use super::ApplyContext;
use crate::error::{EngineError, Result};

fn unknown(id: &IdentityId) -> EngineError {
    EngineError::NotFound(format!("identity {id}"))
}

/// Replace every key with `key`, as authorized by two recovery connections.
pub async fn set_signing_key<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id: &IdentityId,
    key: &PublicKey,
) -> Result<()> {
    if !ctx
        .graph
        .set_signing_keys(id, vec![*key], Some(ctx.block_time))
        .await?
    {
        return Err(unknown(id));
    }
    tracing::info!(%id, "signing key reset by recovery connections");
    Ok(())
}

pub async fn add_signing_key<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id: &IdentityId,
    key: &PublicKey,
) -> Result<()> {
    if !ctx.graph.add_signing_key(id, key).await? {
        return Err(unknown(id));
    }
    Ok(())
}

pub async fn remove_signing_key<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id: &IdentityId,
    key: &PublicKey,
) -> Result<()> {
    if !ctx.graph.remove_signing_key(id, key).await? {
        return Err(unknown(id));
    }
    Ok(())
}

/// Revoke every key except `signing_key`, the one that signed the request.
pub async fn remove_all_signing_keys<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id: &IdentityId,
    signing_key: &PublicKey,
) -> Result<()> {
    if !ctx.graph.retain_signing_key(id, signing_key).await? {
        return Err(unknown(id));
    }
    Ok(())
}
