//! # idchain Core
//!
//! Pure primitives for idchain: identity and graph keys, Ed25519 keys and
//! signatures, the closed set of graph operations, their canonical message
//! encoding, and the stateless checks every node repeats before applying one.
//!
//! This crate contains no I/O and no storage.
//!
//! ## Key Types
//!
//! - [`SignedOperation`] / [`Operation`] - A signed request to mutate the trust graph
//! - [`OpHash`] - Content hash of an operation (SHA-256 of its canonical message)
//! - [`IdentityId`], [`GroupId`], [`AppId`] - Graph keys
//! - [`PublicKey`], [`Signature`], [`Keypair`] - Ed25519 wrappers
//!
//! ## Canonicalization
//!
//! Operations are hashed and signed over sorted-key JSON. See [`canonical`].

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod model;
pub mod operation;
pub mod types;
pub mod validation;

pub use canonical::{canonical_message, hash_message, operation_hash, stable_stringify};
pub use crypto::{Keypair, PublicKey, Signature};
pub use error::{CoreError, ValidationError};
pub use model::{
    AppRecord, ConnectionLevel, ConnectionRecord, ContextLinkRecord, ContextRecord, GroupRecord,
    GroupType, InvitationRecord, OperationRecord, OperationState, PendingSponsorshipRecord,
    TestblockRecord, UserRecord, REPLACED_REASON,
};
pub use operation::{Operation, SignedOperation, OPERATION_VERSION};
pub use types::{AppId, GroupId, IdentityId, OpHash};
pub use validation::{
    check_hash, check_recovery_signers, check_timestamp, check_version, validate_structure,
    verify_with_keys,
};
