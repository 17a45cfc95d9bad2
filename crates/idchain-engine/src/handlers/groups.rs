//! Group lifecycle handlers.
//!
//! A group is founded by three identities. It stays "new" until all three
//! founders joined; while new, only founders may be invited or join.
//! Admins manage membership; the last admin cannot leave.
//!
//! Admin checks and changes to the group record run inside one
//! [`Graph::edit_group`] call, so concurrent operations on a group see each
//! other's effects.

use idchain_core::{GroupId, GroupRecord, GroupType, IdentityId, InvitationRecord};
use idchain_store::{InsertResult, Store};

use super::ApplyContext;
use crate::error::{EngineError, Result};
use crate::graph::Graph;
use crate::trust;

pub struct NewGroup<'a> {
    pub group: &'a GroupId,
    pub founder: &'a IdentityId,
    /// The other two founders with the data of their invitations.
    pub co_founders: [(&'a IdentityId, Option<&'a str>); 2],
    pub url: Option<&'a str>,
    pub group_type: GroupType,
}

async fn load_group<S: Store>(graph: &Graph<S>, group: &GroupId) -> Result<GroupRecord> {
    graph
        .group(group)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("group {group}")))
}

fn require_admin(group: &GroupRecord, id: &IdentityId) -> Result<()> {
    if !group.is_admin(id) {
        return Err(EngineError::AccessDenied(format!(
            "{id} is not an admin of group {}",
            group.id
        )));
    }
    Ok(())
}

/// Whether at least half the group's members connected to `id`.
pub async fn is_eligible<S: Store>(graph: &Graph<S>, group: &GroupId, id: &IdentityId) -> Result<bool> {
    let members = graph.members(group).await?;
    let connectors = graph.connectors_of(id).await?;
    Ok(trust::is_eligible(&connectors, &members))
}

/// Invitation preconditions shared by founding and later invites.
async fn check_invitee<S: Store>(
    ctx: &ApplyContext<'_, S>,
    group: &GroupRecord,
    invitee: &IdentityId,
) -> Result<()> {
    if group.group_type == GroupType::Primary && ctx.graph.has_primary_group(invitee).await? {
        return Err(EngineError::InvariantViolation(format!(
            "{invitee} already has a primary group"
        )));
    }
    if group.is_new && !group.is_founder(invitee) {
        return Err(EngineError::AccessDenied(format!(
            "new group {} only accepts its founders",
            group.id
        )));
    }
    Ok(())
}

/// Refresh the eligible-group index of every outsider at least half the
/// members know.
pub async fn update_eligibles<S: Store>(graph: &Graph<S>, group: &GroupId) -> Result<()> {
    let members = graph.members(group).await?;
    let mut outbound = Vec::with_capacity(members.len());
    for member in &members {
        let connections = graph
            .connections_from(member)
            .await?
            .into_iter()
            .map(|c| (c.to.clone(), c.level()))
            .collect();
        outbound.push((member.clone(), connections));
    }
    for neighbor in trust::eligible_neighbors(&members, &outbound) {
        graph.add_eligible_group(&neighbor, group).await?;
    }
    Ok(())
}

/// Found a group: the founder joins and the two co-founders are invited.
pub async fn add_group<S: Store>(ctx: &ApplyContext<'_, S>, new: NewGroup<'_>) -> Result<()> {
    let graph = ctx.graph;
    let NewGroup {
        group,
        founder,
        co_founders,
        url,
        group_type,
    } = new;

    if graph.group(group).await?.is_some() {
        return Err(EngineError::AlreadyExists(format!("group {group}")));
    }

    // Connected both ways: co-founders to the founder, the founder to them.
    let founder_connectors = graph.connectors_of(founder).await?;
    for (co_founder, _) in &co_founders {
        if !founder_connectors.contains(co_founder) {
            return Err(EngineError::NotEligible(format!(
                "{co_founder} is not connected to {founder}"
            )));
        }
        if !graph.connectors_of(co_founder).await?.contains(founder) {
            return Err(EngineError::NotEligible(format!(
                "{founder} is not connected to {co_founder}"
            )));
        }
    }

    let mut founders = vec![founder.clone(), co_founders[0].0.clone(), co_founders[1].0.clone()];
    founders.sort();

    if group_type == GroupType::Primary {
        for id in &founders {
            if graph.has_primary_group(id).await? {
                return Err(EngineError::InvariantViolation(format!(
                    "{id} already has a primary group"
                )));
            }
        }
    }

    let record = GroupRecord {
        id: group.clone(),
        group_type,
        admins: founders.clone(),
        founders,
        is_new: true,
        url: url.map(str::to_owned),
        timestamp: ctx.block_time,
    };
    if graph.insert_group(&record).await? == InsertResult::AlreadyExists {
        return Err(EngineError::AlreadyExists(format!("group {group}")));
    }

    graph.add_member(group, founder, ctx.block_time).await?;
    for (co_founder, data) in co_founders {
        let invitation = InvitationRecord {
            inviter: founder.clone(),
            data: data.map(str::to_owned),
        };
        graph
            .replace_invitation(co_founder, group, &invitation, ctx.block_time)
            .await?;
    }

    tracing::debug!(%group, %founder, "group created");
    Ok(())
}

/// Delete a group with its memberships and invitations.
pub async fn remove_group<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id: &IdentityId,
    group: &GroupId,
) -> Result<()> {
    let record = load_group(ctx.graph, group).await?;
    require_admin(&record, id)?;
    ctx.graph.remove_group(group).await
}

/// Join a group through an unexpired invitation.
pub async fn add_membership<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id: &IdentityId,
    group: &GroupId,
) -> Result<()> {
    let graph = ctx.graph;
    let record = load_group(graph, group).await?;
    check_invitee(ctx, &record, id).await?;

    if !is_eligible(graph, group, id).await? {
        return Err(EngineError::NotEligible(format!(
            "{id} is not connected to enough members of group {group}"
        )));
    }

    let invited = graph
        .invitation(id, group)
        .await?
        .is_some_and(|inv| ctx.block_time - inv.timestamp < ctx.config.groups.invite_ttl_ms);
    if !invited {
        return Err(EngineError::AccessDenied(format!(
            "{id} is not invited to group {group}"
        )));
    }

    graph.remove_invitation(id, group).await?;
    graph.add_member(group, id, ctx.block_time).await?;

    if record.is_new && graph.members(group).await?.len() == record.founders.len() {
        graph
            .edit_group(group, |record| {
                let was_new = record.is_new;
                record.is_new = false;
                Ok(was_new)
            })
            .await?;
    }

    update_eligibles(graph, group).await
}

/// Leave a group.
pub async fn remove_membership<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id: &IdentityId,
    group: &GroupId,
) -> Result<()> {
    leave(ctx, id, group, None).await
}

/// Drop `id` from the admins and the members, checking `dismisser` holds
/// admin rights at the same moment.
async fn leave<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id: &IdentityId,
    group: &GroupId,
    dismisser: Option<&IdentityId>,
) -> Result<()> {
    let graph = ctx.graph;
    let leaver = id.clone();
    let dismisser = dismisser.cloned();
    graph
        .edit_group(group, move |record| {
            if let Some(dismisser) = &dismisser {
                require_admin(record, dismisser)?;
            }
            if !record.is_admin(&leaver) {
                return Ok(false);
            }
            record.admins.retain(|admin| admin != &leaver);
            if record.admins.is_empty() {
                return Err(EngineError::InvariantViolation(format!(
                    "{leaver} is the last admin of group {}",
                    record.id
                )));
            }
            Ok(true)
        })
        .await?;

    graph.remove_member(group, id).await?;
    // A promotion that landed after the edit above.
    drop_admin(graph, group, id).await?;
    update_eligibles(graph, group).await
}

/// Remove `id` from the admins unless it is the only one.
async fn drop_admin<S: Store>(graph: &Graph<S>, group: &GroupId, id: &IdentityId) -> Result<()> {
    let id = id.clone();
    let dropped = graph
        .edit_group(group, move |record| {
            if !record.is_admin(&id) || record.admins.len() == 1 {
                return Ok(false);
            }
            record.admins.retain(|admin| admin != &id);
            Ok(true)
        })
        .await;
    match dropped {
        Err(EngineError::NotFound(_)) => Ok(()),
        other => other,
    }
}

/// Invite an eligible identity. Replaces any earlier invitation.
pub async fn invite<S: Store>(
    ctx: &ApplyContext<'_, S>,
    inviter: &IdentityId,
    invitee: &IdentityId,
    group: &GroupId,
    data: Option<&str>,
) -> Result<()> {
    let graph = ctx.graph;
    let record = load_group(graph, group).await?;
    require_admin(&record, inviter)?;

    if !is_eligible(graph, group, invitee).await? {
        return Err(EngineError::NotEligible(format!(
            "{invitee} is not connected to enough members of group {group}"
        )));
    }
    check_invitee(ctx, &record, invitee).await?;

    let invitation = InvitationRecord {
        inviter: inviter.clone(),
        data: data.map(str::to_owned),
    };
    graph
        .replace_invitation(invitee, group, &invitation, ctx.block_time)
        .await
}

/// Remove a member on an admin's behalf.
pub async fn dismiss<S: Store>(
    ctx: &ApplyContext<'_, S>,
    dismisser: &IdentityId,
    dismissee: &IdentityId,
    group: &GroupId,
) -> Result<()> {
    leave(ctx, dismissee, group, Some(dismisser)).await
}

/// Promote a member to admin.
pub async fn add_admin<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id: &IdentityId,
    admin: &IdentityId,
    group: &GroupId,
) -> Result<()> {
    let graph = ctx.graph;
    if !graph.is_member(admin, group).await? {
        return Err(EngineError::NotEligible(format!(
            "{admin} is not a member of group {group}"
        )));
    }

    let (promoter, promoted) = (id.clone(), admin.clone());
    graph
        .edit_group(group, move |record| {
            require_admin(record, &promoter)?;
            if record.is_admin(&promoted) {
                return Ok(false);
            }
            record.admins.push(promoted);
            Ok(true)
        })
        .await?;

    if !graph.is_member(admin, group).await? {
        tracing::debug!(%admin, %group, "promoted member left, promotion dropped");
        drop_admin(graph, group, admin).await?;
    }
    Ok(())
}

/// Change a group's url.
pub async fn update_group<S: Store>(
    ctx: &ApplyContext<'_, S>,
    id: &IdentityId,
    group: &GroupId,
    url: Option<&str>,
) -> Result<()> {
    let editor = id.clone();
    let url = url.map(str::to_owned);
    let timestamp = ctx.block_time;
    ctx.graph
        .edit_group(group, move |record| {
            require_admin(record, &editor)?;
            record.url = url;
            record.timestamp = timestamp;
            Ok(true)
        })
        .await
}
