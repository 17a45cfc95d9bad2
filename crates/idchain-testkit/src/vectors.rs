//! Golden test vectors for deterministic verification.
//!
//! Each vector pins the canonical message and content hash of one
//! operation. Signatures are excluded from both, so the vectors use plain
//! string keys and zero signatures.

use idchain_core::canonical::canonical_message;
use idchain_core::{
    hash_message, AppId, ConnectionLevel, GroupId, GroupType, Operation, PublicKey, Signature,
    SignedOperation,
};

/// Client timestamp shared by the vectors.
const TIMESTAMP: i64 = 1_700_000_000_000;

/// A golden test vector.
#[derive(Debug, Clone)]
pub struct GoldenVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// Builds the operation.
    pub operation: fn() -> SignedOperation,
    /// Expected canonical message.
    pub expected_message: &'static str,
    /// Expected hash (unpadded base64url of SHA-256).
    pub expected_hash: &'static str,
}

/// Get all golden test vectors.
pub fn all_vectors() -> Vec<GoldenVector> {
    vec![
        GoldenVector {
            name: "Add Membership",
            operation: || {
                SignedOperation::new(
                    Operation::AddMembership {
                        id: "alice".into(),
                        group: GroupId::from("g1"),
                        sig: Signature::ZERO,
                    },
                    TIMESTAMP,
                )
            },
            expected_message: r#"{"group":"g1","id":"alice","name":"Add Membership","timestamp":1700000000000,"v":5}"#,
            expected_hash: "XLFI2cbCD2mylDD8hBkDl_neByIsoAI0BgaZXzcEGFE",
        },
        GoldenVector {
            name: "Connect with level",
            operation: || {
                SignedOperation::new(
                    Operation::Connect {
                        id1: "alice".into(),
                        id2: "bob".into(),
                        level: Some(ConnectionLevel::JustMet),
                        report_reason: None,
                        replaced_with: None,
                        request_proof: None,
                        sig1: Signature::ZERO,
                    },
                    TIMESTAMP,
                )
            },
            expected_message: r#"{"id1":"alice","id2":"bob","level":"just met","name":"Connect","timestamp":1700000000000,"v":5}"#,
            expected_hash: "ZPwedGKcJuCO-lfo4TOXKT3KVcykx09Ncmdn1GT29Fk",
        },
        GoldenVector {
            name: "Set Signing Key omits its co-signers",
            operation: || {
                SignedOperation::new(
                    Operation::SetSigningKey {
                        id: "alice".into(),
                        signing_key: PublicKey::from_bytes([7u8; 32]),
                        id1: "bob".into(),
                        id2: "carol".into(),
                        sig1: Signature::ZERO,
                        sig2: Signature::ZERO,
                    },
                    TIMESTAMP,
                )
            },
            expected_message: r#"{"id":"alice","name":"Set Signing Key","signingKey":"BwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwcHBwc=","timestamp":1700000000000,"v":5}"#,
            expected_hash: "sKrcaS70MncQYrbIHfVUJPx403FI30j3zZpooFM20e0",
        },
        GoldenVector {
            name: "Sponsor by context id",
            operation: || {
                SignedOperation::new(
                    Operation::Sponsor {
                        app: AppId::from("idchain-app"),
                        id: None,
                        context_id: Some("0xabc".into()),
                        sig: Signature::ZERO,
                    },
                    TIMESTAMP,
                )
            },
            expected_message: r#"{"app":"idchain-app","contextId":"0xabc","name":"Sponsor","timestamp":1700000000000,"v":5}"#,
            expected_hash: "jzQMIJF0SescRchNSCJY-y18e-KoY3Bslpxv5pCr3sY",
        },
        GoldenVector {
            name: "Add Group",
            operation: || {
                SignedOperation::new(
                    Operation::AddGroup {
                        group: GroupId::from("g1"),
                        id1: "alice".into(),
                        id2: "bob".into(),
                        invite_data2: None,
                        id3: "carol".into(),
                        invite_data3: None,
                        url: Some("https://example.org/g1".into()),
                        group_type: GroupType::Primary,
                        sig1: Signature::ZERO,
                    },
                    TIMESTAMP,
                )
            },
            expected_message: r#"{"group":"g1","id1":"alice","id2":"bob","id3":"carol","name":"Add Group","timestamp":1700000000000,"type":"primary","url":"https://example.org/g1","v":5}"#,
            expected_hash: "1Hf8iDfAgmng7IBX-H1zcFzh6Eszk2ioSUSRoZd9uxQ",
        },
        GoldenVector {
            name: "Link ContextId",
            operation: || {
                SignedOperation::new(
                    Operation::LinkContextId {
                        id: Some("alice".into()),
                        context: "ethereum".into(),
                        context_id: Some("0xabc".into()),
                        encrypted: None,
                        sig: Signature::ZERO,
                    },
                    TIMESTAMP,
                )
                .with_block_time(TIMESTAMP + 5_000)
            },
            expected_message: r#"{"context":"ethereum","contextId":"0xabc","id":"alice","name":"Link ContextId","timestamp":1700000000000,"v":5}"#,
            expected_hash: "neR6BkYdAxY6LqqFpBagkPGo_X2qQMte2xGL5uJ8_gg",
        },
    ]
}

/// Check every vector; returns the names of the ones that do not match.
pub fn verify_all_vectors() -> Result<(), Vec<&'static str>> {
    let failures: Vec<&'static str> = all_vectors()
        .into_iter()
        .filter(|vector| !matches(vector))
        .map(|vector| vector.name)
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures)
    }
}

fn matches(vector: &GoldenVector) -> bool {
    let op = (vector.operation)();
    let Ok(message) = canonical_message(&op) else {
        return false;
    };
    message == vector.expected_message
        && hash_message(&message).to_base64() == vector.expected_hash
}
