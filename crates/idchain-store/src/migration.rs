//! SQLite schema setup.
//!
//! The schema version lives in the database header (`PRAGMA user_version`);
//! each step is one SQL batch applied inside a single transaction.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Schema version this build writes, kept in SQLite's `user_version`.
pub const CURRENT_VERSION: u32 = 1;

/// Bring the schema up to [`CURRENT_VERSION`]. Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    let found: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if found > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "schema v{found} is newer than supported v{CURRENT_VERSION}"
        )));
    }
    if found == CURRENT_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for version in found + 1..=CURRENT_VERSION {
        match version {
            1 => apply_v1(&tx)?,
            other => {
                return Err(StoreError::Migration(format!("no migration to v{other}")));
            }
        }
        tracing::debug!(version, "store schema migrated");
    }
    tx.pragma_update(None, "user_version", CURRENT_VERSION)?;
    tx.commit()?;
    Ok(())
}

/// Migration v1: documents and edges.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Keyed documents, one row per (collection, key)
        CREATE TABLE documents (
            collection TEXT NOT NULL,
            key TEXT NOT NULL,
            body BLOB NOT NULL,               -- CBOR-encoded document
            PRIMARY KEY (collection, key)
        );

        -- Directed edges; id doubles as insertion order
        CREATE TABLE edges (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            from_key TEXT NOT NULL,
            to_key TEXT NOT NULL,
            timestamp INTEGER NOT NULL,       -- ordering key (Unix ms)
            body BLOB NOT NULL                -- CBOR-encoded edge attributes
        );

        CREATE INDEX idx_edges_from ON edges(collection, from_key, timestamp);
        CREATE INDEX idx_edges_to ON edges(collection, to_key, timestamp);
        "#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_version(conn: &Connection) -> u32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_fresh_database_gets_documents_and_edges() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(user_version(&conn), CURRENT_VERSION);

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('documents', 'edges')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_reopen_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();
        assert_eq!(user_version(&conn), CURRENT_VERSION);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", CURRENT_VERSION + 1)
            .unwrap();
        assert!(matches!(migrate(&mut conn), Err(StoreError::Migration(_))));
    }
}
