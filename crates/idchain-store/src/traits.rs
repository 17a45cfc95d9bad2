//! Store trait: the abstract interface for graph persistence.
//!
//! The graph is a set of keyed documents per collection plus directed edges
//! per edge collection. Handlers never query storage directly; they go
//! through named accessors built on these primitives.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// A stored document. Always a JSON object.
pub type Document = serde_json::Value;

/// In-place edit of a document, applied atomically by the store.
pub type DocumentPatch = Box<dyn FnOnce(&mut Document) + Send + 'static>;

/// Conditional edit of a document. Returning `false` discards the draft.
pub type DocumentEdit = Box<dyn FnOnce(&mut Document) -> bool + Send + 'static>;

/// Document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Users,
    Groups,
    Apps,
    Contexts,
    /// Ledger records keyed by operation hash.
    Operations,
    /// Hashes of operations that were applied.
    OperationHashes,
    /// Locally constructed operations awaiting broadcast.
    Outbox,
    /// Holder of each linked context id, keyed by context and id.
    LinkOwners,
    /// Claim markers of sponsored identities.
    Sponsored,
}

impl Collection {
    pub fn name(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Groups => "groups",
            Collection::Apps => "apps",
            Collection::Contexts => "contexts",
            Collection::Operations => "operations",
            Collection::OperationHashes => "operation_hashes",
            Collection::Outbox => "outbox",
            Collection::LinkOwners => "link_owners",
            Collection::Sponsored => "sponsored",
        }
    }
}

/// Edge collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdgeCollection {
    /// Current connection per ordered pair (identity -> identity).
    Connections,
    /// Append-only connection history (identity -> identity).
    ConnectionsHistory,
    /// identity -> group
    Memberships,
    /// identity -> group
    Invitations,
    /// identity -> app
    Sponsorships,
    /// context id -> app
    PendingSponsorships,
    /// identity -> context id
    ContextLinks,
    /// identity -> verification name
    Verifications,
    /// context id -> app
    Testblocks,
}

impl EdgeCollection {
    pub fn name(self) -> &'static str {
        match self {
            EdgeCollection::Connections => "connections",
            EdgeCollection::ConnectionsHistory => "connections_history",
            EdgeCollection::Memberships => "memberships",
            EdgeCollection::Invitations => "invitations",
            EdgeCollection::Sponsorships => "sponsorships",
            EdgeCollection::PendingSponsorships => "pending_sponsorships",
            EdgeCollection::ContextLinks => "context_links",
            EdgeCollection::Verifications => "verifications",
            EdgeCollection::Testblocks => "testblocks",
        }
    }
}

/// Store-assigned edge identifier. Increases with insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(pub i64);

/// A directed edge.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub id: EdgeId,
    pub from: String,
    pub to: String,
    /// Ordering key for "most recent" queries.
    pub timestamp: i64,
    pub body: Document,
}

impl Edge {
    /// Decode the edge body into a typed record.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Result of inserting a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// Document was inserted.
    Inserted,
    /// A document with this key already exists; nothing was written.
    AlreadyExists,
}

/// Result of a conditional edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditResult {
    /// The edit accepted the draft and it was written.
    Written,
    /// The edit rejected the draft; the document is unchanged.
    Declined,
    /// No document has this key.
    Missing,
}

/// The Store trait: async interface for graph persistence.
///
/// # Design Notes
///
/// - **Document atomicity**: `edit` reads, checks and writes one document
///   under the store's write lock, so concurrent read-modify-writes of one
///   document serialize and a check made inside the edit still holds when
///   the draft is written.
/// - **Ordering**: edge queries return edges sorted by `timestamp`, then by
///   insertion order, never by insertion order alone.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Document Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a document by key.
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>>;

    /// Check if a document exists.
    async fn exists(&self, collection: Collection, key: &str) -> Result<bool>;

    /// Insert a document unless the key is taken.
    async fn insert(&self, collection: Collection, key: &str, doc: Document)
        -> Result<InsertResult>;

    /// Insert or overwrite a document.
    async fn replace(&self, collection: Collection, key: &str, doc: Document) -> Result<()>;

    /// Atomically edit a document, keeping the draft only if `edit` returns
    /// `true`.
    async fn edit(&self, collection: Collection, key: &str, edit: DocumentEdit)
        -> Result<EditResult>;

    /// Atomically edit a document in place.
    ///
    /// Returns `false` if the document does not exist.
    async fn update(
        &self,
        collection: Collection,
        key: &str,
        patch: DocumentPatch,
    ) -> Result<bool> {
        let edit: DocumentEdit = Box::new(move |doc| {
            patch(doc);
            true
        });
        Ok(self.edit(collection, key, edit).await? != EditResult::Missing)
    }

    /// Remove a document. Returns `false` if it did not exist.
    async fn remove(&self, collection: Collection, key: &str) -> Result<bool>;

    /// All keys of a collection, sorted.
    async fn keys(&self, collection: Collection) -> Result<Vec<String>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Edge Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert an edge.
    async fn insert_edge(
        &self,
        collection: EdgeCollection,
        from: &str,
        to: &str,
        timestamp: i64,
        body: Document,
    ) -> Result<EdgeId>;

    /// Overwrite an edge's timestamp and body. Returns `false` if missing.
    async fn update_edge(
        &self,
        collection: EdgeCollection,
        id: EdgeId,
        timestamp: i64,
        body: Document,
    ) -> Result<bool>;

    /// Remove an edge. Returns `false` if it did not exist.
    async fn remove_edge(&self, collection: EdgeCollection, id: EdgeId) -> Result<bool>;

    /// The most recent edge between two endpoints, if any.
    async fn edge_between(
        &self,
        collection: EdgeCollection,
        from: &str,
        to: &str,
    ) -> Result<Option<Edge>>;

    /// All edges leaving `from`.
    async fn edges_from(&self, collection: EdgeCollection, from: &str) -> Result<Vec<Edge>>;

    /// All edges entering `to`.
    async fn edges_to(&self, collection: EdgeCollection, to: &str) -> Result<Vec<Edge>>;

    /// Number of edges entering `to`.
    async fn count_edges_to(&self, collection: EdgeCollection, to: &str) -> Result<u64>;
}

/// Extension trait for typed documents.
pub trait StoreExt: Store {
    /// Get and decode a document.
    fn get_as<T: DeserializeOwned + Send>(
        &self,
        collection: Collection,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<T>>> + Send;

    /// Encode and insert or overwrite a document.
    fn put_as<T: Serialize + Sync>(
        &self,
        collection: Collection,
        key: &str,
        value: &T,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Remove every edge between two endpoints. Returns how many were removed.
    fn remove_edges_between(
        &self,
        collection: EdgeCollection,
        from: &str,
        to: &str,
    ) -> impl std::future::Future<Output = Result<usize>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn get_as<T: DeserializeOwned + Send>(
        &self,
        collection: Collection,
        key: &str,
    ) -> Result<Option<T>> {
        match self.get(collection, key).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    async fn put_as<T: Serialize + Sync>(
        &self,
        collection: Collection,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let doc = serde_json::to_value(value)?;
        self.replace(collection, key, doc).await
    }

    async fn remove_edges_between(
        &self,
        collection: EdgeCollection,
        from: &str,
        to: &str,
    ) -> Result<usize> {
        let mut removed = 0;
        for edge in self.edges_from(collection, from).await? {
            if edge.to == to && self.remove_edge(collection, edge.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
