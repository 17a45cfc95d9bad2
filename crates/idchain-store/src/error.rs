//! Failures surfaced by graph store backends.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored body could not be encoded or decoded.
    #[error("codec: {0}")]
    Serialization(String),

    #[error("schema: {0}")]
    Migration(String),

    /// Another writer panicked while holding the in-memory collections.
    #[error("poisoned lock: {0}")]
    Poisoned(String),

    /// The blocking SQLite worker was cancelled or panicked.
    #[error("store task: {0}")]
    Task(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
