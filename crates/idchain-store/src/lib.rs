//! # idchain Store
//!
//! Storage abstraction for the idchain trust graph. Provides a trait-based
//! interface over keyed documents and directed edges, with SQLite and
//! in-memory implementations.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait for all storage operations
//! - [`StoreExt`] - Typed helpers on top of [`Store`]
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`Collection`] / [`EdgeCollection`] - The fixed set of collections
//!
//! ## Usage
//!
//! ```rust,no_run
//! use idchain_store::{Collection, SqliteStore, Store};
//!
//! async fn example() {
//!     let store = SqliteStore::open("graph.db").unwrap();
//!     let user = store.get(Collection::Users, "some-id").await.unwrap();
//!     assert!(user.is_none());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: Inserting an existing key returns `AlreadyExists`
//! - **Atomic edits**: `edit` checks and writes one document under the store's lock
//! - **Ordered edges**: Edge queries sort by timestamp, then insertion order

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    Collection, Document, DocumentEdit, DocumentPatch, Edge, EdgeCollection, EdgeId, EditResult,
    InsertResult, Store, StoreExt,
};
