//! Named accessors over the trust graph.
//!
//! Handlers and projections only touch storage through [`Graph`], which
//! maps graph concepts (users, connections, memberships, links) onto the
//! document and edge primitives of a [`Store`].

use std::sync::Arc;

use idchain_core::{
    AppRecord, ConnectionLevel, ConnectionRecord, ContextLinkRecord, ContextRecord, GroupId,
    GroupRecord, GroupType, IdentityId, InvitationRecord, PendingSponsorshipRecord, PublicKey,
    TestblockRecord, UserRecord,
};
use idchain_store::{
    Collection, DocumentEdit, Edge, EdgeCollection, EdgeId, EditResult, InsertResult, Store,
    StoreError, StoreExt,
};
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::error::{EngineError, Result};
use crate::trust::HistoryEntry;

/// The current connection from one identity to another.
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub from: IdentityId,
    pub to: IdentityId,
    pub record: ConnectionRecord,
    pub timestamp: i64,
    pub edge: EdgeId,
}

/// An open invitation of an identity into a group.
#[derive(Debug, Clone, PartialEq)]
pub struct Invitation {
    pub invitee: IdentityId,
    pub group: GroupId,
    pub inviter: IdentityId,
    pub data: Option<String>,
    pub timestamp: i64,
    pub edge: EdgeId,
}

/// A binding of an identity to an external id within a context.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextLink {
    pub id: IdentityId,
    pub context: String,
    pub context_id: String,
    pub timestamp: i64,
    pub edge: EdgeId,
}

/// A group an identity belongs to and when it joined.
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub group: GroupId,
    pub timestamp: i64,
}

/// A sponsorship reserved for a context id that is not linked yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSponsorship {
    pub context_id: String,
    pub app: String,
    pub expires_at: i64,
    pub edge: EdgeId,
}

/// Graph view over a store.
pub struct Graph<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for Graph<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

/// Outcome of binding a context id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkClaim {
    /// The id was free and is now linked.
    Linked,
    /// The id was already claimed by this identity or another one.
    Held(IdentityId),
}

fn body<T: serde::Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value).map_err(StoreError::from)?)
}

/// Key of a context id's owner document. The length prefix keeps contexts
/// containing ':' apart.
fn link_key(context: &str, context_id: &str) -> String {
    format!("{}:{context}:{context_id}", context.len())
}

impl<S: Store> Graph<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identities
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn user(&self, id: &IdentityId) -> Result<Option<UserRecord>> {
        Ok(self.store.get_as(Collection::Users, id.as_str()).await?)
    }

    pub async fn user_exists(&self, id: &IdentityId) -> Result<bool> {
        Ok(self.store.exists(Collection::Users, id.as_str()).await?)
    }

    /// Create the identity if it does not exist yet.
    ///
    /// A new identity starts with the key its id encodes. Returns whether it
    /// was created.
    pub async fn ensure_user(&self, id: &IdentityId, timestamp: i64) -> Result<bool> {
        let signing_keys = PublicKey::from_identity(id).map(|k| vec![k]).unwrap_or_default();
        let record = UserRecord {
            id: id.clone(),
            signing_keys,
            created_at: timestamp,
            parent: None,
            eligible_groups: Vec::new(),
            update_time: None,
        };
        let result = self
            .store
            .insert(Collection::Users, id.as_str(), body(&record)?)
            .await?;
        Ok(result == InsertResult::Inserted)
    }

    /// Keys a signature of `id` may verify against.
    ///
    /// An identity unknown to the graph can still sign with the key its id
    /// encodes.
    pub async fn signing_keys(&self, id: &IdentityId) -> Result<Vec<PublicKey>> {
        match self.user(id).await? {
            Some(user) => Ok(user.signing_keys),
            None => Ok(PublicKey::from_identity(id).map(|k| vec![k]).unwrap_or_default()),
        }
    }

    /// Set the parent unless one is already recorded.
    pub async fn set_parent_if_absent(&self, id: &IdentityId, parent: &IdentityId) -> Result<()> {
        let parent = parent.as_str().to_owned();
        self.store
            .update(
                Collection::Users,
                id.as_str(),
                Box::new(move |doc| {
                    if doc.get("parent").map_or(true, Value::is_null) {
                        doc["parent"] = Value::String(parent);
                    }
                }),
            )
            .await?;
        Ok(())
    }

    /// Replace all keys. Returns `false` if the identity does not exist.
    pub async fn set_signing_keys(
        &self,
        id: &IdentityId,
        keys: Vec<PublicKey>,
        update_time: Option<i64>,
    ) -> Result<bool> {
        let keys = body(&keys)?;
        Ok(self
            .store
            .update(
                Collection::Users,
                id.as_str(),
                Box::new(move |doc| {
                    doc["signingKeys"] = keys;
                    if let Some(time) = update_time {
                        doc["updateTime"] = json!(time);
                    }
                }),
            )
            .await?)
    }

    /// Add a key in front unless present. Returns `false` if the identity
    /// does not exist.
    pub async fn add_signing_key(&self, id: &IdentityId, key: &PublicKey) -> Result<bool> {
        let key = Value::String(key.to_base64());
        Ok(self
            .store
            .update(
                Collection::Users,
                id.as_str(),
                Box::new(move |doc| {
                    if let Some(keys) = doc["signingKeys"].as_array_mut() {
                        if !keys.contains(&key) {
                            keys.insert(0, key);
                        }
                    } else {
                        doc["signingKeys"] = json!([key]);
                    }
                }),
            )
            .await?)
    }

    /// Drop every key except `keep`, or exactly `key` when `keep` is false.
    async fn filter_signing_keys(&self, id: &IdentityId, key: &PublicKey, keep: bool) -> Result<bool> {
        let key = Value::String(key.to_base64());
        Ok(self
            .store
            .update(
                Collection::Users,
                id.as_str(),
                Box::new(move |doc| {
                    if let Some(keys) = doc["signingKeys"].as_array_mut() {
                        keys.retain(|k| (k == &key) == keep);
                    }
                }),
            )
            .await?)
    }

    pub async fn remove_signing_key(&self, id: &IdentityId, key: &PublicKey) -> Result<bool> {
        self.filter_signing_keys(id, key, false).await
    }

    pub async fn retain_signing_key(&self, id: &IdentityId, key: &PublicKey) -> Result<bool> {
        self.filter_signing_keys(id, key, true).await
    }

    pub async fn set_eligible_groups(&self, id: &IdentityId, groups: &[GroupId]) -> Result<bool> {
        let groups = body(&groups)?;
        Ok(self
            .store
            .update(
                Collection::Users,
                id.as_str(),
                Box::new(move |doc| doc["eligibleGroups"] = groups),
            )
            .await?)
    }

    pub async fn add_eligible_group(&self, id: &IdentityId, group: &GroupId) -> Result<bool> {
        let group = Value::String(group.as_str().to_owned());
        Ok(self
            .store
            .update(
                Collection::Users,
                id.as_str(),
                Box::new(move |doc| {
                    if let Some(groups) = doc["eligibleGroups"].as_array_mut() {
                        if !groups.contains(&group) {
                            groups.push(group);
                        }
                    } else {
                        doc["eligibleGroups"] = json!([group]);
                    }
                }),
            )
            .await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Verifications
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn is_verified(&self, id: &IdentityId, name: &str) -> Result<bool> {
        Ok(self
            .store
            .edge_between(EdgeCollection::Verifications, id.as_str(), name)
            .await?
            .is_some())
    }

    pub async fn verifications(&self, id: &IdentityId) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .edges_from(EdgeCollection::Verifications, id.as_str())
            .await?
            .into_iter()
            .map(|e| e.to)
            .collect();
        names.dedup();
        Ok(names)
    }

    /// Record a verification granted outside the operation pipeline.
    pub async fn add_verification(&self, id: &IdentityId, name: &str, timestamp: i64) -> Result<()> {
        if !self.is_verified(id, name).await? {
            self.store
                .insert_edge(EdgeCollection::Verifications, id.as_str(), name, timestamp, json!({}))
                .await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connections
    // ─────────────────────────────────────────────────────────────────────────

    fn to_connection(edge: Edge) -> Result<Connection> {
        Ok(Connection {
            record: edge.body_as()?,
            from: edge.from.into(),
            to: edge.to.into(),
            timestamp: edge.timestamp,
            edge: edge.id,
        })
    }

    pub async fn connection(&self, from: &IdentityId, to: &IdentityId) -> Result<Option<Connection>> {
        self.store
            .edge_between(EdgeCollection::Connections, from.as_str(), to.as_str())
            .await?
            .map(Self::to_connection)
            .transpose()
    }

    /// Current outbound connections of an identity.
    pub async fn connections_from(&self, id: &IdentityId) -> Result<Vec<Connection>> {
        self.store
            .edges_from(EdgeCollection::Connections, id.as_str())
            .await?
            .into_iter()
            .map(Self::to_connection)
            .collect()
    }

    /// Current inbound connections of an identity.
    pub async fn connections_to(&self, id: &IdentityId) -> Result<Vec<Connection>> {
        self.store
            .edges_to(EdgeCollection::Connections, id.as_str())
            .await?
            .into_iter()
            .map(Self::to_connection)
            .collect()
    }

    /// Identities holding a current connection to `id`, at any level.
    pub async fn connectors_of(&self, id: &IdentityId) -> Result<Vec<IdentityId>> {
        Ok(self
            .store
            .edges_to(EdgeCollection::Connections, id.as_str())
            .await?
            .into_iter()
            .map(|e| IdentityId::from(e.from))
            .collect())
    }

    /// Append to the history and set the current connection.
    pub async fn upsert_connection(
        &self,
        from: &IdentityId,
        to: &IdentityId,
        record: &ConnectionRecord,
        timestamp: i64,
    ) -> Result<()> {
        let doc = body(record)?;
        self.store
            .insert_edge(
                EdgeCollection::ConnectionsHistory,
                from.as_str(),
                to.as_str(),
                timestamp,
                doc.clone(),
            )
            .await?;

        match self.connection(from, to).await? {
            Some(current) => {
                self.store
                    .update_edge(EdgeCollection::Connections, current.edge, timestamp, doc)
                    .await?;
            }
            None => {
                self.store
                    .insert_edge(
                        EdgeCollection::Connections,
                        from.as_str(),
                        to.as_str(),
                        timestamp,
                        doc,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// Full outbound connection history of an identity.
    pub async fn connection_history(&self, id: &IdentityId) -> Result<Vec<HistoryEntry>> {
        self.store
            .edges_from(EdgeCollection::ConnectionsHistory, id.as_str())
            .await?
            .into_iter()
            .map(|edge| {
                let record: ConnectionRecord = edge.body_as()?;
                Ok(HistoryEntry {
                    to: edge.to.into(),
                    level: record.level,
                    timestamp: edge.timestamp,
                })
            })
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Groups
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn group(&self, id: &GroupId) -> Result<Option<GroupRecord>> {
        Ok(self.store.get_as(Collection::Groups, id.as_str()).await?)
    }

    pub async fn insert_group(&self, group: &GroupRecord) -> Result<InsertResult> {
        Ok(self
            .store
            .insert(Collection::Groups, group.id.as_str(), body(group)?)
            .await?)
    }

    /// Check and change a group in one atomic step.
    ///
    /// `change` sees the stored record under the store's write lock and
    /// returns whether to write it back. An error from `change` leaves the
    /// group untouched and is returned.
    pub async fn edit_group<F>(&self, id: &GroupId, change: F) -> Result<()>
    where
        F: FnOnce(&mut GroupRecord) -> Result<bool> + Send + 'static,
    {
        let (refused, mut reason) = oneshot::channel();
        let edit: DocumentEdit = Box::new(move |doc| {
            let outcome = serde_json::from_value::<GroupRecord>(doc.clone())
                .map_err(|e| EngineError::Store(StoreError::from(e)))
                .and_then(|mut record| {
                    if !change(&mut record)? {
                        return Ok(false);
                    }
                    *doc = body(&record)?;
                    Ok(true)
                });
            match outcome {
                Ok(write) => write,
                Err(e) => {
                    let _ = refused.send(e);
                    false
                }
            }
        });
        match self.store.edit(Collection::Groups, id.as_str(), edit).await? {
            EditResult::Written => Ok(()),
            EditResult::Missing => Err(EngineError::NotFound(format!("group {id}"))),
            EditResult::Declined => match reason.try_recv() {
                Ok(e) => Err(e),
                Err(_) => Ok(()),
            },
        }
    }

    /// Remove a group with its memberships and invitations.
    pub async fn remove_group(&self, id: &GroupId) -> Result<()> {
        for edge in self
            .store
            .edges_to(EdgeCollection::Invitations, id.as_str())
            .await?
        {
            self.store
                .remove_edge(EdgeCollection::Invitations, edge.id)
                .await?;
        }
        for edge in self
            .store
            .edges_to(EdgeCollection::Memberships, id.as_str())
            .await?
        {
            self.store
                .remove_edge(EdgeCollection::Memberships, edge.id)
                .await?;
        }
        self.store.remove(Collection::Groups, id.as_str()).await?;
        Ok(())
    }

    /// Members in join order.
    pub async fn members(&self, group: &GroupId) -> Result<Vec<IdentityId>> {
        let mut members: Vec<IdentityId> = Vec::new();
        for edge in self
            .store
            .edges_to(EdgeCollection::Memberships, group.as_str())
            .await?
        {
            let id = IdentityId::from(edge.from);
            if !members.contains(&id) {
                members.push(id);
            }
        }
        Ok(members)
    }

    pub async fn is_member(&self, id: &IdentityId, group: &GroupId) -> Result<bool> {
        Ok(self
            .store
            .edge_between(EdgeCollection::Memberships, id.as_str(), group.as_str())
            .await?
            .is_some())
    }

    pub async fn add_member(&self, group: &GroupId, id: &IdentityId, timestamp: i64) -> Result<()> {
        match self
            .store
            .edge_between(EdgeCollection::Memberships, id.as_str(), group.as_str())
            .await?
        {
            Some(edge) => {
                self.store
                    .update_edge(EdgeCollection::Memberships, edge.id, timestamp, json!({}))
                    .await?;
            }
            None => {
                self.store
                    .insert_edge(
                        EdgeCollection::Memberships,
                        id.as_str(),
                        group.as_str(),
                        timestamp,
                        json!({}),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn remove_member(&self, group: &GroupId, id: &IdentityId) -> Result<()> {
        self.store
            .remove_edges_between(EdgeCollection::Memberships, id.as_str(), group.as_str())
            .await?;
        Ok(())
    }

    pub async fn memberships(&self, id: &IdentityId) -> Result<Vec<Membership>> {
        Ok(self
            .store
            .edges_from(EdgeCollection::Memberships, id.as_str())
            .await?
            .into_iter()
            .map(|e| Membership {
                group: e.to.into(),
                timestamp: e.timestamp,
            })
            .collect())
    }

    pub async fn has_primary_group(&self, id: &IdentityId) -> Result<bool> {
        for membership in self.memberships(id).await? {
            if let Some(group) = self.group(&membership.group).await? {
                if group.group_type == GroupType::Primary {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Invitations
    // ─────────────────────────────────────────────────────────────────────────

    fn to_invitation(edge: Edge) -> Result<Invitation> {
        let record: InvitationRecord = edge.body_as()?;
        Ok(Invitation {
            invitee: edge.from.into(),
            group: edge.to.into(),
            inviter: record.inviter,
            data: record.data,
            timestamp: edge.timestamp,
            edge: edge.id,
        })
    }

    pub async fn invitation(&self, id: &IdentityId, group: &GroupId) -> Result<Option<Invitation>> {
        self.store
            .edge_between(EdgeCollection::Invitations, id.as_str(), group.as_str())
            .await?
            .map(Self::to_invitation)
            .transpose()
    }

    /// Invite an identity, replacing any earlier invitation to the group.
    pub async fn replace_invitation(
        &self,
        invitee: &IdentityId,
        group: &GroupId,
        record: &InvitationRecord,
        timestamp: i64,
    ) -> Result<()> {
        self.store
            .remove_edges_between(EdgeCollection::Invitations, invitee.as_str(), group.as_str())
            .await?;
        self.store
            .insert_edge(
                EdgeCollection::Invitations,
                invitee.as_str(),
                group.as_str(),
                timestamp,
                body(record)?,
            )
            .await?;
        Ok(())
    }

    pub async fn remove_invitation(&self, invitee: &IdentityId, group: &GroupId) -> Result<()> {
        self.store
            .remove_edges_between(EdgeCollection::Invitations, invitee.as_str(), group.as_str())
            .await?;
        Ok(())
    }

    pub async fn invitations_for(&self, id: &IdentityId) -> Result<Vec<Invitation>> {
        self.store
            .edges_from(EdgeCollection::Invitations, id.as_str())
            .await?
            .into_iter()
            .map(Self::to_invitation)
            .collect()
    }

    pub async fn invitations_to(&self, group: &GroupId) -> Result<Vec<Invitation>> {
        self.store
            .edges_to(EdgeCollection::Invitations, group.as_str())
            .await?
            .into_iter()
            .map(Self::to_invitation)
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Contexts and links
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn context(&self, name: &str) -> Result<Option<ContextRecord>> {
        Ok(self.store.get_as(Collection::Contexts, name).await?)
    }

    pub async fn put_context(&self, context: &ContextRecord) -> Result<()> {
        Ok(self
            .store
            .put_as(Collection::Contexts, &context.name, context)
            .await?)
    }

    fn to_link(edge: Edge) -> Result<ContextLink> {
        let record: ContextLinkRecord = edge.body_as()?;
        Ok(ContextLink {
            id: edge.from.into(),
            context: record.context,
            context_id: edge.to,
            timestamp: edge.timestamp,
            edge: edge.id,
        })
    }

    /// The identity a context id is bound to, if any.
    pub async fn link_owner(&self, context: &str, context_id: &str) -> Result<Option<IdentityId>> {
        let owner: Option<Value> = self
            .store
            .get_as(Collection::LinkOwners, &link_key(context, context_id))
            .await?;
        Ok(owner
            .as_ref()
            .and_then(|doc| doc["id"].as_str())
            .map(IdentityId::from))
    }

    /// Links of an identity within one context, oldest first.
    pub async fn links_of(&self, id: &IdentityId, context: &str) -> Result<Vec<ContextLink>> {
        let mut links = Vec::new();
        for edge in self
            .store
            .edges_from(EdgeCollection::ContextLinks, id.as_str())
            .await?
        {
            let link = Self::to_link(edge)?;
            if link.context == context {
                links.push(link);
            }
        }
        Ok(links)
    }

    /// Claim `context_id` for `id` and link it.
    ///
    /// The claim is a keyed insert, so of two identities racing for one id
    /// exactly one links it. Nothing is written when the id is held.
    pub async fn insert_link(
        &self,
        id: &IdentityId,
        context: &str,
        context_id: &str,
        timestamp: i64,
    ) -> Result<LinkClaim> {
        let key = link_key(context, context_id);
        let claimed = self
            .store
            .insert(Collection::LinkOwners, &key, json!({ "id": id.as_str() }))
            .await?;
        if claimed == InsertResult::AlreadyExists {
            let holder = self
                .link_owner(context, context_id)
                .await?
                .ok_or_else(|| EngineError::NotFound(format!("owner of {key}")))?;
            return Ok(LinkClaim::Held(holder));
        }

        let record = ContextLinkRecord {
            context: context.to_owned(),
        };
        self.store
            .insert_edge(
                EdgeCollection::ContextLinks,
                id.as_str(),
                context_id,
                timestamp,
                body(&record)?,
            )
            .await?;
        Ok(LinkClaim::Linked)
    }

    pub async fn touch_link(&self, link: &ContextLink, timestamp: i64) -> Result<()> {
        let record = ContextLinkRecord {
            context: link.context.clone(),
        };
        self.store
            .update_edge(EdgeCollection::ContextLinks, link.edge, timestamp, body(&record)?)
            .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Test markers
    // ─────────────────────────────────────────────────────────────────────────

    /// Mark a context id so an app's next `action` is exercised without
    /// effect on production integrations.
    pub async fn add_testblock(
        &self,
        context_id: &str,
        app: &str,
        action: &str,
        timestamp: i64,
    ) -> Result<()> {
        let record = TestblockRecord {
            action: action.to_owned(),
        };
        self.store
            .insert_edge(EdgeCollection::Testblocks, context_id, app, timestamp, body(&record)?)
            .await?;
        Ok(())
    }

    /// Actions blocked for a context id, optionally within one app.
    pub async fn testblocks(&self, context_id: &str, app: Option<&str>) -> Result<Vec<String>> {
        let mut actions = Vec::new();
        for edge in self
            .store
            .edges_from(EdgeCollection::Testblocks, context_id)
            .await?
        {
            if app.map_or(true, |app| edge.to == app) {
                let record: TestblockRecord = edge.body_as()?;
                actions.push(record.action);
            }
        }
        Ok(actions)
    }

    /// Clear test markers for an action, optionally within one app.
    pub async fn remove_testblocks(
        &self,
        context_id: &str,
        action: &str,
        app: Option<&str>,
    ) -> Result<usize> {
        let mut removed = 0;
        for edge in self
            .store
            .edges_from(EdgeCollection::Testblocks, context_id)
            .await?
        {
            let record: TestblockRecord = edge.body_as()?;
            if record.action == action
                && app.map_or(true, |app| edge.to == app)
                && self
                    .store
                    .remove_edge(EdgeCollection::Testblocks, edge.id)
                    .await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Apps and sponsorships
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn app(&self, id: &str) -> Result<Option<AppRecord>> {
        Ok(self.store.get_as(Collection::Apps, id).await?)
    }

    pub async fn put_app(&self, app: &AppRecord) -> Result<()> {
        Ok(self
            .store
            .put_as(Collection::Apps, app.id.as_str(), app)
            .await?)
    }

    pub async fn is_sponsored(&self, id: &IdentityId) -> Result<bool> {
        Ok(self.store.exists(Collection::Sponsored, id.as_str()).await?)
    }

    /// Record that `app` sponsors `id`.
    ///
    /// Returns `None` when `id` is already sponsored; the claim is a keyed
    /// insert, so concurrent sponsorships of one identity cannot both land.
    pub async fn insert_sponsorship(
        &self,
        id: &IdentityId,
        app: &str,
        timestamp: i64,
    ) -> Result<Option<EdgeId>> {
        let claimed = self
            .store
            .insert(Collection::Sponsored, id.as_str(), json!({ "app": app }))
            .await?;
        if claimed == InsertResult::AlreadyExists {
            return Ok(None);
        }
        let edge = self
            .store
            .insert_edge(EdgeCollection::Sponsorships, id.as_str(), app, timestamp, json!({}))
            .await?;
        Ok(Some(edge))
    }

    /// Undo a sponsorship recorded by [`Graph::insert_sponsorship`].
    pub async fn remove_sponsorship(&self, id: &IdentityId, edge: EdgeId) -> Result<()> {
        self.store
            .remove_edge(EdgeCollection::Sponsorships, edge)
            .await?;
        self.store.remove(Collection::Sponsored, id.as_str()).await?;
        Ok(())
    }

    /// How many of an app's sponsorships were recorded no later than `edge`.
    pub async fn sponsorship_rank(&self, app: &str, edge: EdgeId) -> Result<u64> {
        Ok(self
            .store
            .edges_to(EdgeCollection::Sponsorships, app)
            .await?
            .iter()
            .filter(|e| e.id <= edge)
            .count() as u64)
    }

    /// Sponsorships an app has handed out to identities.
    pub async fn sponsorships_assigned(&self, app: &str) -> Result<u64> {
        Ok(self
            .store
            .count_edges_to(EdgeCollection::Sponsorships, app)
            .await?)
    }

    /// Unexpired placeholders of an app at `now`.
    pub async fn pending_sponsorships_of(&self, app: &str, now: i64) -> Result<Vec<PendingSponsorship>> {
        let mut pending = Vec::new();
        for edge in self
            .store
            .edges_to(EdgeCollection::PendingSponsorships, app)
            .await?
        {
            let placeholder = Self::to_pending(edge)?;
            if placeholder.expires_at > now {
                pending.push(placeholder);
            }
        }
        Ok(pending)
    }

    fn to_pending(edge: Edge) -> Result<PendingSponsorship> {
        let record: PendingSponsorshipRecord = edge.body_as()?;
        Ok(PendingSponsorship {
            context_id: edge.from,
            app: edge.to,
            expires_at: record.expires_at,
            edge: edge.id,
        })
    }

    /// The unexpired placeholder reserved for a context id, if any.
    pub async fn pending_sponsorship(&self, context_id: &str, now: i64) -> Result<Option<PendingSponsorship>> {
        for edge in self
            .store
            .edges_from(EdgeCollection::PendingSponsorships, context_id)
            .await?
        {
            let placeholder = Self::to_pending(edge)?;
            if placeholder.expires_at > now {
                return Ok(Some(placeholder));
            }
        }
        Ok(None)
    }

    pub async fn insert_pending_sponsorship(
        &self,
        context_id: &str,
        app: &str,
        timestamp: i64,
        expires_at: i64,
    ) -> Result<()> {
        let record = PendingSponsorshipRecord { expires_at };
        self.store
            .insert_edge(
                EdgeCollection::PendingSponsorships,
                context_id,
                app,
                timestamp,
                body(&record)?,
            )
            .await?;
        Ok(())
    }

    pub async fn remove_pending_sponsorship(&self, placeholder: &PendingSponsorship) -> Result<()> {
        self.store
            .remove_edge(EdgeCollection::PendingSponsorships, placeholder.edge)
            .await?;
        Ok(())
    }

    /// Delete placeholders that expired at or before `now`.
    pub async fn purge_expired_placeholders(&self, app: &str, now: i64) -> Result<usize> {
        let mut removed = 0;
        for edge in self
            .store
            .edges_to(EdgeCollection::PendingSponsorships, app)
            .await?
        {
            let placeholder = Self::to_pending(edge)?;
            if placeholder.expires_at <= now
                && self
                    .store
                    .remove_edge(EdgeCollection::PendingSponsorships, placeholder.edge)
                    .await?
            {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl Connection {
    pub fn level(&self) -> ConnectionLevel {
        self.record.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idchain_core::Keypair;
    use idchain_store::MemoryStore;

    fn graph() -> Graph<MemoryStore> {
        Graph::new(Arc::new(MemoryStore::new()))
    }

    fn record(level: ConnectionLevel) -> ConnectionRecord {
        ConnectionRecord {
            level,
            report_reason: None,
            replaced_with: None,
            request_proof: None,
        }
    }

    #[tokio::test]
    async fn test_ensure_user_derives_key_from_id() {
        let graph = graph();
        let keypair = Keypair::from_seed(&[3u8; 32]);
        let id = keypair.identity();

        assert!(graph.ensure_user(&id, 10).await.unwrap());
        assert!(!graph.ensure_user(&id, 20).await.unwrap());

        let user = graph.user(&id).await.unwrap().unwrap();
        assert_eq!(user.signing_keys, vec![keypair.public_key()]);
        assert_eq!(user.created_at, 10);
        assert_eq!(graph.signing_keys(&id).await.unwrap(), user.signing_keys);
    }

    #[tokio::test]
    async fn test_signing_key_edits() {
        let graph = graph();
        let id = Keypair::from_seed(&[1u8; 32]).identity();
        let original = PublicKey::from_identity(&id).unwrap();
        let extra = Keypair::from_seed(&[2u8; 32]).public_key();
        graph.ensure_user(&id, 0).await.unwrap();

        graph.add_signing_key(&id, &extra).await.unwrap();
        graph.add_signing_key(&id, &extra).await.unwrap();
        assert_eq!(graph.signing_keys(&id).await.unwrap(), vec![extra, original]);

        graph.retain_signing_key(&id, &original).await.unwrap();
        assert_eq!(graph.signing_keys(&id).await.unwrap(), vec![original]);

        graph.remove_signing_key(&id, &original).await.unwrap();
        assert!(graph.signing_keys(&id).await.unwrap().is_empty());

        let missing = IdentityId::from("nobody");
        assert!(!graph.add_signing_key(&missing, &extra).await.unwrap());
    }

    #[tokio::test]
    async fn test_parent_is_set_once() {
        let graph = graph();
        let id = IdentityId::from("child");
        graph.ensure_user(&id, 0).await.unwrap();
        graph.set_parent_if_absent(&id, &"p1".into()).await.unwrap();
        graph.set_parent_if_absent(&id, &"p2".into()).await.unwrap();
        let user = graph.user(&id).await.unwrap().unwrap();
        assert_eq!(user.parent, Some("p1".into()));
    }

    #[tokio::test]
    async fn test_upsert_connection_keeps_history() {
        let graph = graph();
        let (a, b) = (IdentityId::from("a"), IdentityId::from("b"));
        graph
            .upsert_connection(&a, &b, &record(ConnectionLevel::JustMet), 1)
            .await
            .unwrap();
        graph
            .upsert_connection(&a, &b, &record(ConnectionLevel::Recovery), 2)
            .await
            .unwrap();

        let current = graph.connection(&a, &b).await.unwrap().unwrap();
        assert_eq!(current.level(), ConnectionLevel::Recovery);
        assert_eq!(current.timestamp, 2);
        assert_eq!(graph.connections_from(&a).await.unwrap().len(), 1);
        assert_eq!(graph.connectors_of(&b).await.unwrap(), vec![a.clone()]);

        let history = graph.connection_history(&a).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].level, ConnectionLevel::JustMet);
    }

    #[tokio::test]
    async fn test_links_are_scoped_by_context() {
        let graph = graph();
        let id = IdentityId::from("u");
        graph.insert_link(&id, "ctx", "x", 1).await.unwrap();
        graph.insert_link(&id, "other", "x", 2).await.unwrap();

        assert_eq!(graph.link_owner("ctx", "x").await.unwrap(), Some(id.clone()));
        assert_eq!(graph.link_owner("ctx", "y").await.unwrap(), None);
        assert_eq!(graph.links_of(&id, "ctx").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_held_context_id_is_not_relinked() {
        let graph = graph();
        let c = IdentityId::from("c");
        let d = IdentityId::from("d");

        assert_eq!(graph.insert_link(&c, "ctx", "x", 5).await.unwrap(), LinkClaim::Linked);
        assert_eq!(
            graph.insert_link(&d, "ctx", "x", 10).await.unwrap(),
            LinkClaim::Held(c.clone())
        );
        assert!(graph.links_of(&d, "ctx").await.unwrap().is_empty());
        // "a:b" in context "c" and "b" in context "a:c" do not collide.
        assert_eq!(graph.insert_link(&c, "c", "a:b", 1).await.unwrap(), LinkClaim::Linked);
        assert_eq!(graph.insert_link(&d, "a:c", "b", 1).await.unwrap(), LinkClaim::Linked);
    }

    #[tokio::test]
    async fn test_sponsorship_is_claimed_once() {
        let graph = graph();
        let id = IdentityId::from("u");

        let edge = graph.insert_sponsorship(&id, "app", 1).await.unwrap();
        assert!(edge.is_some());
        assert_eq!(graph.insert_sponsorship(&id, "other", 2).await.unwrap(), None);
        assert_eq!(graph.sponsorships_assigned("other").await.unwrap(), 0);
        assert!(graph.is_sponsored(&id).await.unwrap());

        graph.remove_sponsorship(&id, edge.unwrap()).await.unwrap();
        assert!(!graph.is_sponsored(&id).await.unwrap());
        assert_eq!(graph.sponsorships_assigned("app").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_refused_group_edit_leaves_group() {
        let graph = graph();
        let a = IdentityId::from("a");
        let group = GroupRecord {
            id: GroupId::from("g"),
            group_type: GroupType::General,
            founders: vec![a.clone()],
            admins: vec![a.clone()],
            is_new: true,
            url: None,
            timestamp: 1,
        };
        graph.insert_group(&group).await.unwrap();

        let err = graph
            .edit_group(&group.id, |record| {
                record.admins.clear();
                Err(EngineError::InvariantViolation("no admins left".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvariantViolation(_)));
        assert_eq!(graph.group(&group.id).await.unwrap(), Some(group.clone()));

        graph
            .edit_group(&group.id, |record| {
                record.is_new = false;
                Ok(true)
            })
            .await
            .unwrap();
        assert!(!graph.group(&group.id).await.unwrap().unwrap().is_new);

        let missing = graph.edit_group(&GroupId::from("h"), |_| Ok(true)).await;
        assert!(matches!(missing, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_expired_placeholders_are_absent() {
        let graph = graph();
        graph
            .insert_pending_sponsorship("x", "app", 0, 100)
            .await
            .unwrap();
        assert!(graph.pending_sponsorship("x", 99).await.unwrap().is_some());
        assert!(graph.pending_sponsorship("x", 100).await.unwrap().is_none());
        assert_eq!(graph.pending_sponsorships_of("app", 50).await.unwrap().len(), 1);
        assert_eq!(graph.purge_expired_placeholders("app", 100).await.unwrap(), 1);
        assert!(graph.pending_sponsorships_of("app", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_testblocks_filtered_by_action_and_app() {
        let graph = graph();
        graph.add_testblock("x", "app1", "link", 1).await.unwrap();
        graph.add_testblock("x", "app2", "link", 1).await.unwrap();
        graph.add_testblock("x", "app1", "sponsorship", 1).await.unwrap();

        assert_eq!(graph.testblocks("x", Some("app1")).await.unwrap().len(), 2);
        assert_eq!(
            graph.remove_testblocks("x", "sponsorship", Some("app1")).await.unwrap(),
            1
        );
        assert_eq!(graph.remove_testblocks("x", "link", None).await.unwrap(), 2);
        assert!(graph.testblocks("x", None).await.unwrap().is_empty());
    }
}
