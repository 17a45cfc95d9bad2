//! Volatile graph store behind one `RwLock`.
//!
//! Mirrors [`SqliteStore`](crate::SqliteStore) ordering: edges come back by
//! `(timestamp, id)` and keys in lexical order.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::traits::{
    Collection, Document, DocumentEdit, Edge, EdgeCollection, EdgeId, EditResult, InsertResult,
    Store,
};

pub struct MemoryStore {
    inner: RwLock<Graph>,
}

#[derive(Default)]
struct Graph {
    /// Documents per collection, ordered by key.
    documents: HashMap<Collection, BTreeMap<String, Document>>,

    /// Edges per collection, ordered by id.
    edges: HashMap<EdgeCollection, BTreeMap<EdgeId, Edge>>,

    /// Last assigned edge id.
    last_edge_id: i64,
}

impl Graph {
    fn sorted_edges(&self, collection: EdgeCollection, filter: impl Fn(&Edge) -> bool) -> Vec<Edge> {
        let mut edges: Vec<Edge> = self
            .edges
            .get(&collection)
            .into_iter()
            .flat_map(|edges| edges.values())
            .filter(|edge| filter(edge))
            .cloned()
            .collect();
        edges.sort_by_key(|edge| (edge.timestamp, edge.id));
        edges
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Graph::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Graph>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Graph>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>> {
        let inner = self.read()?;
        Ok(inner
            .documents
            .get(&collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    async fn exists(&self, collection: Collection, key: &str) -> Result<bool> {
        let inner = self.read()?;
        Ok(inner
            .documents
            .get(&collection)
            .is_some_and(|docs| docs.contains_key(key)))
    }

    async fn insert(
        &self,
        collection: Collection,
        key: &str,
        doc: Document,
    ) -> Result<InsertResult> {
        let mut inner = self.write()?;
        let docs = inner.documents.entry(collection).or_default();
        if docs.contains_key(key) {
            return Ok(InsertResult::AlreadyExists);
        }
        docs.insert(key.to_owned(), doc);
        Ok(InsertResult::Inserted)
    }

    async fn replace(&self, collection: Collection, key: &str, doc: Document) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .documents
            .entry(collection)
            .or_default()
            .insert(key.to_owned(), doc);
        Ok(())
    }

    async fn edit(
        &self,
        collection: Collection,
        key: &str,
        edit: DocumentEdit,
    ) -> Result<EditResult> {
        let mut inner = self.write()?;
        let Some(doc) = inner
            .documents
            .get_mut(&collection)
            .and_then(|docs| docs.get_mut(key))
        else {
            return Ok(EditResult::Missing);
        };
        let mut draft = doc.clone();
        if !edit(&mut draft) {
            return Ok(EditResult::Declined);
        }
        *doc = draft;
        Ok(EditResult::Written)
    }

    async fn remove(&self, collection: Collection, key: &str) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(inner
            .documents
            .get_mut(&collection)
            .and_then(|docs| docs.remove(key))
            .is_some())
    }

    async fn keys(&self, collection: Collection) -> Result<Vec<String>> {
        let inner = self.read()?;
        Ok(inner
            .documents
            .get(&collection)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_edge(
        &self,
        collection: EdgeCollection,
        from: &str,
        to: &str,
        timestamp: i64,
        body: Document,
    ) -> Result<EdgeId> {
        let mut inner = self.write()?;
        inner.last_edge_id += 1;
        let id = EdgeId(inner.last_edge_id);
        inner.edges.entry(collection).or_default().insert(
            id,
            Edge {
                id,
                from: from.to_owned(),
                to: to.to_owned(),
                timestamp,
                body,
            },
        );
        Ok(id)
    }

    async fn update_edge(
        &self,
        collection: EdgeCollection,
        id: EdgeId,
        timestamp: i64,
        body: Document,
    ) -> Result<bool> {
        let mut inner = self.write()?;
        match inner
            .edges
            .get_mut(&collection)
            .and_then(|edges| edges.get_mut(&id))
        {
            Some(edge) => {
                edge.timestamp = timestamp;
                edge.body = body;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_edge(&self, collection: EdgeCollection, id: EdgeId) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(inner
            .edges
            .get_mut(&collection)
            .and_then(|edges| edges.remove(&id))
            .is_some())
    }

    async fn edge_between(
        &self,
        collection: EdgeCollection,
        from: &str,
        to: &str,
    ) -> Result<Option<Edge>> {
        let inner = self.read()?;
        Ok(inner
            .sorted_edges(collection, |e| e.from == from && e.to == to)
            .pop())
    }

    async fn edges_from(&self, collection: EdgeCollection, from: &str) -> Result<Vec<Edge>> {
        let inner = self.read()?;
        Ok(inner.sorted_edges(collection, |e| e.from == from))
    }

    async fn edges_to(&self, collection: EdgeCollection, to: &str) -> Result<Vec<Edge>> {
        let inner = self.read()?;
        Ok(inner.sorted_edges(collection, |e| e.to == to))
    }

    async fn count_edges_to(&self, collection: EdgeCollection, to: &str) -> Result<u64> {
        let inner = self.read()?;
        Ok(inner
            .edges
            .get(&collection)
            .map(|edges| edges.values().filter(|e| e.to == to).count() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = MemoryStore::new();
        let r1 = store
            .insert(Collection::Users, "alice", json!({"a": 1}))
            .await
            .unwrap();
        let r2 = store
            .insert(Collection::Users, "alice", json!({"a": 2}))
            .await
            .unwrap();
        assert_eq!(r1, InsertResult::Inserted);
        assert_eq!(r2, InsertResult::AlreadyExists);
        assert_eq!(
            store.get(Collection::Users, "alice").await.unwrap(),
            Some(json!({"a": 1}))
        );
    }

    #[tokio::test]
    async fn test_update_patches_in_place() {
        let store = MemoryStore::new();
        store
            .replace(Collection::Groups, "g", json!({"admins": ["a"]}))
            .await
            .unwrap();

        let updated = store
            .update(
                Collection::Groups,
                "g",
                Box::new(|doc| doc["admins"] = json!(["a", "b"])),
            )
            .await
            .unwrap();
        assert!(updated);
        assert_eq!(
            store.get(Collection::Groups, "g").await.unwrap().unwrap()["admins"],
            json!(["a", "b"])
        );

        let missing = store
            .update(Collection::Groups, "nope", Box::new(|_| {}))
            .await
            .unwrap();
        assert!(!missing);
    }

    #[tokio::test]
    async fn test_declined_edit_keeps_document() {
        let store = MemoryStore::new();
        store
            .replace(Collection::Groups, "g", json!({"admins": ["a"]}))
            .await
            .unwrap();

        let result = store
            .edit(
                Collection::Groups,
                "g",
                Box::new(|doc| {
                    doc["admins"] = json!([]);
                    false
                }),
            )
            .await
            .unwrap();
        assert_eq!(result, EditResult::Declined);
        assert_eq!(
            store.get(Collection::Groups, "g").await.unwrap().unwrap()["admins"],
            json!(["a"])
        );

        let missing = store
            .edit(Collection::Groups, "nope", Box::new(|_| true))
            .await
            .unwrap();
        assert_eq!(missing, EditResult::Missing);
    }

    #[tokio::test]
    async fn test_edges_ordered_by_timestamp() {
        let store = MemoryStore::new();
        let c = EdgeCollection::ConnectionsHistory;
        store.insert_edge(c, "a", "b", 30, json!({})).await.unwrap();
        store.insert_edge(c, "a", "c", 10, json!({})).await.unwrap();
        store.insert_edge(c, "a", "b", 20, json!({})).await.unwrap();
        store.insert_edge(c, "x", "b", 5, json!({})).await.unwrap();

        let from_a: Vec<i64> = store
            .edges_from(c, "a")
            .await
            .unwrap()
            .iter()
            .map(|e| e.timestamp)
            .collect();
        assert_eq!(from_a, vec![10, 20, 30]);

        let latest = store.edge_between(c, "a", "b").await.unwrap().unwrap();
        assert_eq!(latest.timestamp, 30);

        assert_eq!(store.count_edges_to(c, "b").await.unwrap(), 3);
        assert_eq!(store.edges_to(c, "b").await.unwrap()[0].from, "x");
    }

    #[tokio::test]
    async fn test_remove_edges_between() {
        let store = MemoryStore::new();
        let c = EdgeCollection::Invitations;
        store.insert_edge(c, "u", "g", 1, json!({})).await.unwrap();
        store.insert_edge(c, "u", "g", 2, json!({})).await.unwrap();
        store.insert_edge(c, "u", "h", 3, json!({})).await.unwrap();

        assert_eq!(store.remove_edges_between(c, "u", "g").await.unwrap(), 2);
        assert!(store.edge_between(c, "u", "g").await.unwrap().is_none());
        assert_eq!(store.edges_from(c, "u").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_typed_documents() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Doc {
            n: u32,
        }
        let store = MemoryStore::new();
        store.put_as(Collection::Apps, "k", &Doc { n: 3 }).await.unwrap();
        let doc: Option<Doc> = store.get_as(Collection::Apps, "k").await.unwrap();
        assert_eq!(doc, Some(Doc { n: 3 }));
        assert_eq!(store.keys(Collection::Apps).await.unwrap(), vec!["k"]);
    }

    proptest::proptest! {
        #[test]
        fn prop_edges_come_back_in_timestamp_order(
            stamps in proptest::collection::vec(0i64..50, 1..20),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let listed = rt.block_on(async {
                let store = MemoryStore::new();
                let c = EdgeCollection::ConnectionsHistory;
                for t in &stamps {
                    store.insert_edge(c, "a", "b", *t, json!({})).await.unwrap();
                }
                store.edges_from(c, "a").await.unwrap()
            });
            let keys: Vec<(i64, EdgeId)> = listed.iter().map(|e| (e.timestamp, e.id)).collect();
            let mut sorted = keys.clone();
            sorted.sort();
            proptest::prop_assert_eq!(keys.len(), stamps.len());
            proptest::prop_assert_eq!(keys, sorted);
        }
    }
}
