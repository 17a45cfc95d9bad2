//! Error types for the settlement engine.

use idchain_cipher::CipherError;
use idchain_core::{CoreError, ValidationError};
use idchain_store::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while verifying or applying an operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid operation version: {0}")]
    InvalidVersion(u32),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid operation hash: {0}")]
    InvalidHash(String),

    #[error("too many operations: {0}")]
    RateLimited(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not eligible: {0}")]
    NotEligible(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// The operation is well-typed but its shape is wrong.
    #[error("malformed operation: {0}")]
    Malformed(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("lock poisoned: {0}")]
    Poisoned(String),
}

impl EngineError {
    /// Stable classification recorded with failed operations.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidVersion(_) => ErrorKind::InvalidVersion,
            EngineError::InvalidTimestamp(_) => ErrorKind::InvalidTimestamp,
            EngineError::InvalidSignature(_) => ErrorKind::InvalidSignature,
            EngineError::InvalidHash(_) => ErrorKind::InvalidHash,
            EngineError::RateLimited(_) => ErrorKind::RateLimited,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AccessDenied(_) => ErrorKind::AccessDenied,
            EngineError::NotEligible(_) => ErrorKind::NotEligible,
            EngineError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            EngineError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            EngineError::CapacityExhausted(_) => ErrorKind::CapacityExhausted,
            EngineError::Malformed(_) => ErrorKind::Malformed,
            EngineError::Store(_)
            | EngineError::Core(_)
            | EngineError::Cipher(_)
            | EngineError::Config(_)
            | EngineError::Poisoned(_) => ErrorKind::Internal,
        }
    }

    /// Serializable form stored in the ledger.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::UnsupportedVersion(v) => EngineError::InvalidVersion(v),
            e @ ValidationError::FutureTimestamp { .. } => {
                EngineError::InvalidTimestamp(e.to_string())
            }
            e @ ValidationError::SignatureFailed { .. } => {
                EngineError::InvalidSignature(e.to_string())
            }
            e @ ValidationError::HashMismatch { .. } => EngineError::InvalidHash(e.to_string()),
            e @ ValidationError::RecoverySigners => EngineError::InvariantViolation(e.to_string()),
            ValidationError::StructuralError(msg) => EngineError::Malformed(msg),
        }
    }
}

/// Classification of an operation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidVersion,
    InvalidTimestamp,
    InvalidSignature,
    InvalidHash,
    RateLimited,
    NotFound,
    AccessDenied,
    NotEligible,
    AlreadyExists,
    InvariantViolation,
    CapacityExhausted,
    Malformed,
    /// Storage or encoding failure unrelated to the operation itself.
    Internal,
}

/// The `result` of a failed ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
