//! Sealed link envelope.
//!
//! A sealed link carries the linking identity and the external context id
//! under the context's key. On the wire it is
//! `base64(CBOR {format, nonce, ciphertext})`; the plaintext is the sorted-key
//! JSON object `{"contextId": .., "id": ..}`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use idchain_core::{stable_stringify, IdentityId};

use crate::crypto::{LinkKey, SealNonce};
use crate::error::{CipherError, Result};

/// Format identifier for sealed payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SealFormat {
    /// ChaCha20-Poly1305 with 256-bit key.
    ChaCha20Poly1305 = 1,
}

/// The confidential part of a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkPayload {
    pub id: IdentityId,
    pub context_id: String,
}

impl LinkPayload {
    pub fn new(id: IdentityId, context_id: impl Into<String>) -> Self {
        Self {
            id,
            context_id: context_id.into(),
        }
    }

    fn to_plaintext(&self) -> Result<String> {
        let value = serde_json::to_value(self)
            .map_err(|e| CipherError::SerializationError(e.to_string()))?;
        Ok(stable_stringify(&value))
    }
}

/// An encrypted link payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedLink {
    /// Encryption algorithm used.
    pub format: SealFormat,

    /// Nonce used for encryption (unique per seal).
    pub nonce: SealNonce,

    /// The encrypted data (includes authentication tag).
    pub ciphertext: Vec<u8>,
}

impl SealedLink {
    /// Seal a payload under the given key.
    pub fn seal(payload: &LinkPayload, key: &LinkKey) -> Result<Self> {
        let nonce = SealNonce::generate();
        let ciphertext = key.encrypt(payload.to_plaintext()?.as_bytes(), &nonce)?;

        Ok(Self {
            format: SealFormat::ChaCha20Poly1305,
            nonce,
            ciphertext,
        })
    }

    /// Open with the given key.
    pub fn open(&self, key: &LinkKey) -> Result<LinkPayload> {
        let plaintext = match self.format {
            SealFormat::ChaCha20Poly1305 => key.decrypt(&self.ciphertext, &self.nonce)?,
        };
        serde_json::from_slice(&plaintext)
            .map_err(|e| CipherError::SerializationError(e.to_string()))
    }

    /// Encode to the base64 wire string.
    pub fn to_base64(&self) -> Result<String> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CipherError::SerializationError(e.to_string()))?;
        Ok(STANDARD.encode(buf))
    }

    /// Decode from the base64 wire string.
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = STANDARD.decode(s)?;
        ciborium::from_reader(&bytes[..])
            .map_err(|e| CipherError::SerializationError(e.to_string()))
    }
}

/// Seal a link for a context and return the wire string.
pub fn seal_link(context: &str, secret: &str, payload: &LinkPayload) -> Result<String> {
    SealedLink::seal(payload, &LinkKey::derive(context, secret))?.to_base64()
}

/// Open a wire string sealed for a context.
pub fn open_link(context: &str, secret: &str, sealed: &str) -> Result<LinkPayload> {
    SealedLink::from_base64(sealed)?.open(&LinkKey::derive(context, secret))
}
