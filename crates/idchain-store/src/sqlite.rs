//! Durable graph store on bundled SQLite.
//!
//! Every call hops onto the blocking pool and holds the single connection
//! for the duration of its closure. Bodies are CBOR.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    Collection, Document, DocumentEdit, Edge, EdgeCollection, EdgeId, EditResult, InsertResult,
    Store,
};

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// A private in-memory database; nothing survives the store.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| StoreError::Poisoned(e.to_string()))
}

fn encode_document(doc: &Document) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(doc, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_document(bytes: &[u8]) -> Result<Document> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

type EdgeRow = (i64, String, String, i64, Vec<u8>);

fn row_to_edge_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EdgeRow> {
    Ok((
        row.get("id")?,
        row.get("from_key")?,
        row.get("to_key")?,
        row.get("timestamp")?,
        row.get("body")?,
    ))
}

fn edge_from_row((id, from, to, timestamp, body): EdgeRow) -> Result<Edge> {
    Ok(Edge {
        id: EdgeId(id),
        from,
        to,
        timestamp,
        body: decode_document(&body)?,
    })
}

fn query_edges(conn: &Connection, sql: &str, collection: &str, endpoint: &str) -> Result<Vec<Edge>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params![collection, endpoint], row_to_edge_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(edge_from_row).collect()
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>> {
        let key = key.to_owned();
        self.run(move |conn| {
            let body: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
                    params![collection.name(), key],
                    |row| row.get(0),
                )
                .optional()?;
            body.map(|b| decode_document(&b)).transpose()
        })
        .await
    }

    async fn exists(&self, collection: Collection, key: &str) -> Result<bool> {
        let key = key.to_owned();
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM documents WHERE collection = ?1 AND key = ?2",
                    params![collection.name(), key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn insert(
        &self,
        collection: Collection,
        key: &str,
        doc: Document,
    ) -> Result<InsertResult> {
        let key = key.to_owned();
        let body = encode_document(&doc)?;
        self.run(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO documents (collection, key, body) VALUES (?1, ?2, ?3)",
                params![collection.name(), key, body],
            )?;
            Ok(if changed == 0 {
                InsertResult::AlreadyExists
            } else {
                InsertResult::Inserted
            })
        })
        .await
    }

    async fn replace(&self, collection: Collection, key: &str, doc: Document) -> Result<()> {
        let key = key.to_owned();
        let body = encode_document(&doc)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO documents (collection, key, body) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, key) DO UPDATE SET body = excluded.body",
                params![collection.name(), key, body],
            )?;
            Ok(())
        })
        .await
    }

    async fn edit(
        &self,
        collection: Collection,
        key: &str,
        edit: DocumentEdit,
    ) -> Result<EditResult> {
        let key = key.to_owned();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let body: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
                    params![collection.name(), key],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(body) = body else {
                return Ok(EditResult::Missing);
            };

            let mut doc = decode_document(&body)?;
            if !edit(&mut doc) {
                return Ok(EditResult::Declined);
            }
            tx.execute(
                "UPDATE documents SET body = ?3 WHERE collection = ?1 AND key = ?2",
                params![collection.name(), key, encode_document(&doc)?],
            )?;
            tx.commit()?;
            Ok(EditResult::Written)
        })
        .await
    }

    async fn remove(&self, collection: Collection, key: &str) -> Result<bool> {
        let key = key.to_owned();
        self.run(move |conn| {
            let changed = conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND key = ?2",
                params![collection.name(), key],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn keys(&self, collection: Collection) -> Result<Vec<String>> {
        self.run(move |conn| {
            let mut stmt =
                conn.prepare("SELECT key FROM documents WHERE collection = ?1 ORDER BY key")?;
            let keys = stmt
                .query_map(params![collection.name()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn insert_edge(
        &self,
        collection: EdgeCollection,
        from: &str,
        to: &str,
        timestamp: i64,
        body: Document,
    ) -> Result<EdgeId> {
        let from = from.to_owned();
        let to = to.to_owned();
        let body = encode_document(&body)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO edges (collection, from_key, to_key, timestamp, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![collection.name(), from, to, timestamp, body],
            )?;
            Ok(EdgeId(conn.last_insert_rowid()))
        })
        .await
    }

    async fn update_edge(
        &self,
        collection: EdgeCollection,
        id: EdgeId,
        timestamp: i64,
        body: Document,
    ) -> Result<bool> {
        let body = encode_document(&body)?;
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE edges SET timestamp = ?3, body = ?4 WHERE collection = ?1 AND id = ?2",
                params![collection.name(), id.0, timestamp, body],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn remove_edge(&self, collection: EdgeCollection, id: EdgeId) -> Result<bool> {
        self.run(move |conn| {
            let changed = conn.execute(
                "DELETE FROM edges WHERE collection = ?1 AND id = ?2",
                params![collection.name(), id.0],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn edge_between(
        &self,
        collection: EdgeCollection,
        from: &str,
        to: &str,
    ) -> Result<Option<Edge>> {
        let from = from.to_owned();
        let to = to.to_owned();
        self.run(move |conn| {
            let row = conn
                .query_row(
                    "SELECT id, from_key, to_key, timestamp, body FROM edges
                     WHERE collection = ?1 AND from_key = ?2 AND to_key = ?3
                     ORDER BY timestamp DESC, id DESC LIMIT 1",
                    params![collection.name(), from, to],
                    row_to_edge_row,
                )
                .optional()?;
            row.map(edge_from_row).transpose()
        })
        .await
    }

    async fn edges_from(&self, collection: EdgeCollection, from: &str) -> Result<Vec<Edge>> {
        let from = from.to_owned();
        self.run(move |conn| {
            query_edges(
                conn,
                "SELECT id, from_key, to_key, timestamp, body FROM edges
                 WHERE collection = ?1 AND from_key = ?2 ORDER BY timestamp, id",
                collection.name(),
                &from,
            )
        })
        .await
    }

    async fn edges_to(&self, collection: EdgeCollection, to: &str) -> Result<Vec<Edge>> {
        let to = to.to_owned();
        self.run(move |conn| {
            query_edges(
                conn,
                "SELECT id, from_key, to_key, timestamp, body FROM edges
                 WHERE collection = ?1 AND to_key = ?2 ORDER BY timestamp, id",
                collection.name(),
                &to,
            )
        })
        .await
    }

    async fn count_edges_to(&self, collection: EdgeCollection, to: &str) -> Result<u64> {
        let to = to.to_owned();
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM edges WHERE collection = ?1 AND to_key = ?2",
                params![collection.name(), to],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }
}
