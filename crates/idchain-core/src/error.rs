//! Error types for idchain core.

use thiserror::Error;

/// Core errors raised while decoding keys, hashes and operation payloads.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("invalid secret key: expected 32 or 64 bytes, got {0}")]
    InvalidSecretKey(usize),

    #[error("invalid operation hash: {0}")]
    InvalidHash(String),

    #[error("base64 decoding error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Stateless verification failures for a signed operation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported operation version: {0}")]
    UnsupportedVersion(u32),

    #[error("timestamp {timestamp} is in the future (limit {limit})")]
    FutureTimestamp { timestamp: i64, limit: i64 },

    #[error("signature verification failed for {signer}")]
    SignatureFailed { signer: String },

    #[error("hash mismatch: claimed {claimed}, computed {computed}")]
    HashMismatch { claimed: String, computed: String },

    #[error("request should be signed by 2 different recovery connections")]
    RecoverySigners,

    #[error("structural error: {0}")]
    StructuralError(String),
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::SignatureFailed {
                    signer: String::from("unknown"),
                }
            }
            CoreError::InvalidHash(msg) => ValidationError::HashMismatch {
                claimed: msg,
                computed: String::new(),
            },
            other => ValidationError::StructuralError(other.to_string()),
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
