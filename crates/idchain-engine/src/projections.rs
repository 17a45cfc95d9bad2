//! Read-only views of the graph for clients.
//!
//! Views use the node clock where time matters (invitation expiry, recovery
//! eligibility); they never feed back into settlement.

use idchain_core::{ConnectionLevel, GroupId, GroupType, IdentityId, PublicKey};
use idchain_store::Store;
use serde::Serialize;

use crate::engine::Engine;
use crate::error::Result;
use crate::graph::{Connection, Invitation};
use crate::trust;

/// Which side of a connection a view is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Connections the identity made.
    Outbound,
    /// Connections made to the identity.
    Inbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: IdentityId,
    pub created_at: i64,
    pub signing_keys: Vec<PublicKey>,
    pub verifications: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<IdentityId>,
    pub has_primary_group: bool,
    pub recovery_connections: Vec<IdentityId>,
    pub reporters: Vec<Reporter>,
    pub eligible_groups: Vec<GroupId>,
    pub sponsored: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reporter {
    pub id: IdentityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionView {
    /// The other end of the connection.
    pub id: IdentityId,
    pub level: ConnectionLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaced_with: Option<IdentityId>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: GroupId,
    #[serde(rename = "type")]
    pub group_type: GroupType,
    pub founders: Vec<IdentityId>,
    pub admins: Vec<IdentityId>,
    pub members: Vec<IdentityId>,
    pub is_new: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipView {
    pub group: GroupId,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InvitationView {
    pub group: GroupId,
    pub inviter: IdentityId,
    pub invitee: IdentityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppView {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub total_sponsorships: u64,
    pub assigned_sponsorships: u64,
    pub pending_sponsorships: u64,
    pub unused_sponsorships: u64,
}

impl From<Invitation> for InvitationView {
    fn from(inv: Invitation) -> Self {
        Self {
            group: inv.group,
            inviter: inv.inviter,
            invitee: inv.invitee,
            data: inv.data,
            timestamp: inv.timestamp,
        }
    }
}

fn connection_view(connection: Connection, direction: Direction) -> ConnectionView {
    let id = match direction {
        Direction::Outbound => connection.to,
        Direction::Inbound => connection.from,
    };
    ConnectionView {
        id,
        level: connection.record.level,
        report_reason: connection.record.report_reason,
        replaced_with: connection.record.replaced_with,
        timestamp: connection.timestamp,
    }
}

impl<S: Store> Engine<S> {
    pub async fn user_view(&self, id: &IdentityId) -> Result<Option<UserView>> {
        let graph = self.graph();
        let Some(user) = graph.user(id).await? else {
            return Ok(None);
        };

        let reporters = graph
            .connections_to(id)
            .await?
            .into_iter()
            .filter(|c| c.level() == ConnectionLevel::Reported)
            .map(|c| Reporter {
                id: c.from,
                reason: c.record.report_reason,
            })
            .collect();

        Ok(Some(UserView {
            verifications: graph.verifications(id).await?,
            has_primary_group: graph.has_primary_group(id).await?,
            recovery_connections: self.recovery_connections(id).await?,
            sponsored: graph.is_sponsored(id).await?,
            reporters,
            id: user.id,
            created_at: user.created_at,
            signing_keys: user.signing_keys,
            parent: user.parent,
            eligible_groups: user.eligible_groups,
        }))
    }

    pub async fn connections(
        &self,
        id: &IdentityId,
        direction: Direction,
    ) -> Result<Vec<ConnectionView>> {
        let connections = match direction {
            Direction::Outbound => self.graph().connections_from(id).await?,
            Direction::Inbound => self.graph().connections_to(id).await?,
        };
        Ok(connections
            .into_iter()
            .map(|c| connection_view(c, direction))
            .collect())
    }

    /// Identities that may currently co-sign a key reset for `id`.
    pub async fn recovery_connections(&self, id: &IdentityId) -> Result<Vec<IdentityId>> {
        let history = self.graph().connection_history(id).await?;
        Ok(trust::recovery_connections(
            &history,
            self.now_ms(),
            &self.config().recovery,
        ))
    }

    pub async fn group_view(&self, group: &GroupId) -> Result<Option<GroupView>> {
        let graph = self.graph();
        let Some(record) = graph.group(group).await? else {
            return Ok(None);
        };
        Ok(Some(GroupView {
            members: graph.members(group).await?,
            id: record.id,
            group_type: record.group_type,
            founders: record.founders,
            admins: record.admins,
            is_new: record.is_new,
            url: record.url,
            timestamp: record.timestamp,
        }))
    }

    pub async fn memberships(&self, id: &IdentityId) -> Result<Vec<MembershipView>> {
        Ok(self
            .graph()
            .memberships(id)
            .await?
            .into_iter()
            .map(|m| MembershipView {
                group: m.group,
                timestamp: m.timestamp,
            })
            .collect())
    }

    /// Unexpired invitations of an identity into existing groups.
    pub async fn invitations(&self, id: &IdentityId) -> Result<Vec<InvitationView>> {
        let graph = self.graph();
        let mut views = Vec::new();
        for invitation in graph.invitations_for(id).await? {
            if self.is_live(&invitation) && graph.group(&invitation.group).await?.is_some() {
                views.push(invitation.into());
            }
        }
        Ok(views)
    }

    /// Unexpired invitations into a group.
    pub async fn group_invitations(&self, group: &GroupId) -> Result<Vec<InvitationView>> {
        Ok(self
            .graph()
            .invitations_to(group)
            .await?
            .into_iter()
            .filter(|inv| self.is_live(inv))
            .map(InvitationView::from)
            .collect())
    }

    fn is_live(&self, invitation: &Invitation) -> bool {
        self.now_ms() - invitation.timestamp < self.config().groups.invite_ttl_ms
    }

    pub async fn app_view(&self, app: &str) -> Result<Option<AppView>> {
        let graph = self.graph();
        let Some(record) = graph.app(app).await? else {
            return Ok(None);
        };
        let assigned = graph.sponsorships_assigned(app).await?;
        let pending = graph.pending_sponsorships_of(app, self.now_ms()).await?.len() as u64;
        Ok(Some(AppView {
            id: record.id.into_string(),
            context: record.context,
            total_sponsorships: record.total_sponsorships,
            assigned_sponsorships: assigned,
            pending_sponsorships: pending,
            unused_sponsorships: record
                .total_sponsorships
                .saturating_sub(assigned + pending),
        }))
    }

    /// Context ids an identity linked in a context, most recent first.
    pub async fn context_ids(&self, id: &IdentityId, context: &str) -> Result<Vec<String>> {
        let mut links = self.graph().links_of(id, context).await?;
        links.sort_by_key(|l| std::cmp::Reverse(l.timestamp));
        Ok(links.into_iter().map(|l| l.context_id).collect())
    }

    /// The identity a context id is linked to.
    pub async fn user_by_context_id(
        &self,
        context: &str,
        context_id: &str,
    ) -> Result<Option<IdentityId>> {
        let graph = self.graph();
        let Some(record) = graph.context(context).await? else {
            return Ok(None);
        };
        let context_id = if record.ids_as_hex {
            context_id.to_lowercase()
        } else {
            context_id.to_owned()
        };
        graph.link_owner(context, &context_id).await
    }
}
