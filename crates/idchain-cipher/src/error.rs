//! Error types for the cipher module.

use thiserror::Error;

/// Errors that can occur while sealing or opening a link payload.
#[derive(Debug, Error)]
pub enum CipherError {
    /// Encryption error.
    #[error("encryption error: {0}")]
    EncryptionError(String),

    /// Decryption error (wrong key or tampered ciphertext).
    #[error("decryption error: {0}")]
    DecryptionError(String),

    /// Envelope or plaintext could not be (de)serialized.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The sealed string is not valid base64.
    #[error("invalid sealed payload encoding: {0}")]
    Encoding(#[from] base64::DecodeError),
}

/// Result type for cipher operations.
pub type Result<T> = std::result::Result<T, CipherError>;
