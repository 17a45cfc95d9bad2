//! Canonical message encoding for operation hashing and signing.
//!
//! The signed message of an operation is its JSON object with the signature,
//! hash and block-time fields removed, written with:
//! - Object keys sorted lexicographically at every depth
//! - No insignificant whitespace
//! - Absent optional fields omitted
//!
//! The operation hash is `base64url(SHA-256(message))` without padding, so it
//! is reproducible by any implementation that follows the same rules.
//!
//! [`canonical_message`] encodes the typed operation, which carries only the
//! fields its kind defines. Wire objects are decoded with
//! [`SignedOperation::from_wire`], which refuses any other signed field.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::operation::SignedOperation;
use crate::types::OpHash;

/// Fields never covered by a signature.
pub const UNSIGNED_FIELDS: &[&str] = &["sig", "sig1", "sig2", "hash", "blockTime"];

/// Signer fields additionally excluded from a key reset's message, so the
/// two recovery connections sign identical bytes.
pub const KEY_RESET_SIGNER_FIELDS: &[&str] = &["id1", "id2"];

/// Build the canonical signed message of an operation.
pub fn canonical_message(op: &SignedOperation) -> Result<String> {
    let value =
        serde_json::to_value(op).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    canonical_message_value(&value)
}

/// Build the canonical signed message from an operation's JSON object.
pub fn canonical_message_value(value: &Value) -> Result<String> {
    let object = value
        .as_object()
        .ok_or_else(|| CoreError::EncodingError("operation is not a JSON object".into()))?;
    let is_key_reset = object.get("name").and_then(Value::as_str) == Some("Set Signing Key");

    let signed: Map<String, Value> = object
        .iter()
        .filter(|(k, _)| !UNSIGNED_FIELDS.contains(&k.as_str()))
        .filter(|(k, _)| !(is_key_reset && KEY_RESET_SIGNER_FIELDS.contains(&k.as_str())))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(stable_stringify(&Value::Object(signed)))
}

/// Hash a canonical message.
pub fn hash_message(message: &str) -> OpHash {
    let digest = Sha256::digest(message.as_bytes());
    OpHash::from_bytes(digest.into())
}

/// Compute the content hash of an operation.
pub fn operation_hash(op: &SignedOperation) -> Result<OpHash> {
    Ok(hash_message(&canonical_message(op)?))
}

/// The message a `Connect` request proof signs.
pub fn request_proof_message(id2: &str, timestamp: i64) -> String {
    format!("{id2}|{timestamp}")
}

/// Serialize a JSON value with sorted object keys and no whitespace.
pub fn stable_stringify(value: &Value) -> String {
    let mut buf = String::new();
    write_value(&mut buf, value);
    buf
}

/// Recursively write a JSON value.
fn write_value(buf: &mut String, value: &Value) {
    match value {
        Value::Null => buf.push_str("null"),
        Value::Bool(b) => buf.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => buf.push_str(&n.to_string()),
        Value::String(s) => write_string(buf, s),
        Value::Array(items) => {
            buf.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    buf.push(',');
                }
                write_value(buf, item);
            }
            buf.push(']');
        }
        Value::Object(map) => write_object_sorted(buf, map),
    }
}

/// Write an object with keys in lexicographic order.
fn write_object_sorted(buf: &mut String, map: &Map<String, Value>) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    buf.push('{');
    for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        write_string(buf, key);
        buf.push(':');
        write_value(buf, value);
    }
    buf.push('}');
}

fn write_string(buf: &mut String, s: &str) {
    // serde_json escapes exactly the characters JSON requires.
    match serde_json::to_string(s) {
        Ok(escaped) => buf.push_str(&escaped),
        Err(_) => buf.push_str("\"\""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Signature;
    use crate::operation::Operation;
    use crate::types::IdentityId;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_at_every_depth() {
        let value = json!({"b": 1, "a": {"z": [3, {"y": 1, "x": 2}], "c": "q"}});
        assert_eq!(
            stable_stringify(&value),
            r#"{"a":{"c":"q","z":[3,{"x":2,"y":1}]},"b":1}"#
        );
    }

    #[test]
    fn test_strings_are_escaped() {
        let value = json!({"k": "quote\" slash\\ nl\n"});
        assert_eq!(stable_stringify(&value), r#"{"k":"quote\" slash\\ nl\n"}"#);
    }

    #[test]
    fn test_message_excludes_unsigned_fields() {
        let op = SignedOperation::new(
            Operation::AddMembership {
                id: IdentityId::from("u1"),
                group: "g1".into(),
                sig: Signature::from_bytes([1u8; 64]),
            },
            1000,
        )
        .with_block_time(2000);

        let message = canonical_message(&op).unwrap();
        assert_eq!(
            message,
            r#"{"group":"g1","id":"u1","name":"Add Membership","timestamp":1000,"v":5}"#
        );
    }

    #[test]
    fn test_key_reset_excludes_signer_ids() {
        let value = json!({
            "name": "Set Signing Key",
            "id": "u",
            "id1": "r1",
            "id2": "r2",
            "signingKey": "k",
            "sig1": "s1",
            "sig2": "s2",
            "timestamp": 5,
            "v": 5,
        });
        assert_eq!(
            canonical_message_value(&value).unwrap(),
            r#"{"id":"u","name":"Set Signing Key","signingKey":"k","timestamp":5,"v":5}"#
        );

        // Other kinds keep id1/id2.
        let value = json!({"name": "Connect", "id1": "a", "id2": "b", "timestamp": 5, "v": 5});
        assert!(canonical_message_value(&value).unwrap().contains("\"id1\""));
    }

    #[test]
    fn test_hash_ignores_block_time_and_signatures() {
        let base = SignedOperation::new(
            Operation::RemoveAllSigningKeys {
                id: "u".into(),
                sig: Signature::from_bytes([1u8; 64]),
            },
            7,
        );
        let mut other = base.clone().with_block_time(99);
        if let Operation::RemoveAllSigningKeys { sig, .. } = &mut other.op {
            *sig = Signature::from_bytes([2u8; 64]);
        }
        assert_eq!(
            operation_hash(&base).unwrap(),
            operation_hash(&other).unwrap()
        );
    }

    #[test]
    fn test_hash_matches_sha256_of_message() {
        // SHA-256("abc"), url-safe base64 without padding.
        assert_eq!(
            hash_message("abc").to_base64(),
            "ungWv48Bz-pBQUDeXa4iI7ADYaOWF3qctBD_YfIAFa0"
        );
    }

    #[test]
    fn test_request_proof_message() {
        assert_eq!(request_proof_message("bob", 42), "bob|42");
    }

    proptest::proptest! {
        #[test]
        fn prop_stringify_independent_of_insertion_order(
            entries in proptest::collection::vec(("[a-z]{1,6}", -1000i64..1000), 0..12)
        ) {
            let mut forward = Map::new();
            for (k, v) in &entries {
                forward.insert(k.clone(), json!(v));
            }
            let mut backward = Map::new();
            for (k, v) in forward.iter().rev() {
                backward.insert(k.clone(), v.clone());
            }

            let a = stable_stringify(&Value::Object(forward));
            let b = stable_stringify(&Value::Object(backward));
            proptest::prop_assert_eq!(&a, &b);
            let reparsed: Value = serde_json::from_str(&a).unwrap();
            proptest::prop_assert_eq!(stable_stringify(&reparsed), a);
        }
    }
}
