//! # idchain Cipher
//!
//! Confidential audit trail for context links. A context that keeps its
//! links private has a link secret; the ledger stores its "Link ContextId"
//! operations sealed under a key derived from that secret, and sealed links
//! arriving from peers are opened before verification.
//!
//! ## Key Types
//!
//! - [`LinkKey`] - ChaCha20-Poly1305 key derived per context with BLAKE3
//! - [`LinkPayload`] - The identity and context id being hidden
//! - [`SealedLink`] - Encrypted envelope, carried as base64 CBOR

pub mod crypto;
pub mod envelope;
pub mod error;

pub use crypto::{LinkKey, SealNonce};
pub use envelope::{open_link, seal_link, LinkPayload, SealFormat, SealedLink};
pub use error::{CipherError, Result};
