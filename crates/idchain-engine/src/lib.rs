//! # idchain Engine
//!
//! Settlement layer of the idchain identity network. Operations arrive in
//! consensus order; the engine verifies each one against the current trust
//! graph, applies it through the handler for its kind, and records the
//! outcome in a hash-keyed ledger so every node converges on the same graph.
//!
//! ## Key Types
//!
//! - [`Engine`] - Applies operations, answers status and read queries
//! - [`EngineConfig`] - Protocol constants, loadable from TOML
//! - [`Graph`] - Named accessors over a [`Store`](idchain_store::Store)
//! - [`Verifier`] - Version, skew, signature and hash checks
//! - [`EngineError`] / [`ErrorKind`] - Failure taxonomy recorded in the ledger
//!
//! ## Usage
//!
//! ```rust,no_run
//! use idchain_engine::{Engine, EngineConfig};
//! use idchain_store::MemoryStore;
//!
//! async fn example(hash: idchain_core::OpHash, op: idchain_core::SignedOperation) {
//!     let engine = Engine::new(MemoryStore::new(), EngineConfig::default());
//!     let outcome = engine.apply_operation(hash, op).await.unwrap();
//!     println!("{}", outcome.state.as_str());
//! }
//! ```

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod handlers;
pub mod ledger;
pub mod projections;
pub mod rate_limit;
pub mod trust;
pub mod verifier;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    EngineConfig, GroupConfig, LinkConfig, ProtocolConfig, RateLimitConfig, RecoveryConfig,
    SponsorshipConfig,
};
pub use engine::{Engine, OperationOutcome};
pub use error::{EngineError, ErrorKind, ErrorReport, Result};
pub use graph::{Graph, LinkClaim};
pub use ledger::{HashLocks, Ledger};
pub use projections::{
    AppView, ConnectionView, Direction, GroupView, InvitationView, MembershipView, Reporter,
    UserView,
};
pub use rate_limit::RateLimiter;
pub use verifier::{Verified, Verifier};
