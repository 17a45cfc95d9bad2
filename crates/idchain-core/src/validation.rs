//! Stateless operation checks: version, clock skew, hash, signatures.
//!
//! Anything that needs graph state (key sets, recovery connections) is
//! resolved by the caller and passed in.

use crate::canonical::{canonical_message, hash_message};
use crate::crypto::{PublicKey, Signature};
use crate::error::ValidationError;
use crate::operation::{Operation, SignedOperation};
use crate::types::{IdentityId, OpHash};

/// Reject operations from another protocol version.
pub fn check_version(op: &SignedOperation, expected: u32) -> Result<(), ValidationError> {
    if op.v != expected {
        return Err(ValidationError::UnsupportedVersion(op.v));
    }
    Ok(())
}

/// Reject client timestamps further than `skew_ms` past `now`.
pub fn check_timestamp(op: &SignedOperation, now: i64, skew_ms: i64) -> Result<(), ValidationError> {
    let limit = now.saturating_add(skew_ms);
    if op.timestamp > limit {
        return Err(ValidationError::FutureTimestamp {
            timestamp: op.timestamp,
            limit,
        });
    }
    Ok(())
}

/// Recompute the content hash and compare with the claimed one.
///
/// Returns the canonical message so callers can verify signatures over it.
pub fn check_hash(op: &SignedOperation, claimed: &OpHash) -> Result<String, ValidationError> {
    let message = canonical_message(op)?;
    let computed = hash_message(&message);
    if &computed != claimed {
        return Err(ValidationError::HashMismatch {
            claimed: claimed.to_base64(),
            computed: computed.to_base64(),
        });
    }
    Ok(message)
}

/// Verify a signature against any of the signer's keys.
///
/// Returns the key that produced the signature.
pub fn verify_with_keys(
    signer: &IdentityId,
    message: &[u8],
    signature: &Signature,
    keys: &[PublicKey],
) -> Result<PublicKey, ValidationError> {
    keys.iter()
        .find(|key| key.verify(message, signature).is_ok())
        .copied()
        .ok_or_else(|| ValidationError::SignatureFailed {
            signer: signer.to_string(),
        })
}

/// A key reset needs two distinct signers, both current recovery
/// connections of the identity being reset.
pub fn check_recovery_signers(
    id1: &IdentityId,
    id2: &IdentityId,
    recovery: &[IdentityId],
) -> Result<(), ValidationError> {
    if id1 == id2 || !recovery.contains(id1) || !recovery.contains(id2) {
        return Err(ValidationError::RecoverySigners);
    }
    Ok(())
}

/// Shape rules the type system cannot express.
pub fn validate_structure(op: &SignedOperation) -> Result<(), ValidationError> {
    match &op.op {
        Operation::Sponsor { id, context_id, .. } => {
            if id.is_some() == context_id.is_some() {
                return Err(ValidationError::StructuralError(
                    "sponsor needs exactly one of id or contextId".into(),
                ));
            }
        }
        Operation::LinkContextId {
            id,
            context_id,
            encrypted,
            ..
        } => {
            let plain = id.is_some() && context_id.is_some();
            if plain == encrypted.is_some() {
                return Err(ValidationError::StructuralError(
                    "link needs id and contextId, or an encrypted payload".into(),
                ));
            }
        }
        Operation::AddGroup { id1, id2, id3, .. } => {
            if id1 == id2 || id1 == id3 || id2 == id3 {
                return Err(ValidationError::StructuralError(
                    "group founders must be distinct".into(),
                ));
            }
        }
        Operation::Connect { id1, id2, .. }
        | Operation::AddConnection { id1, id2, .. }
        | Operation::RemoveConnection { id1, id2, .. } => {
            if id1 == id2 {
                return Err(ValidationError::StructuralError(
                    "an identity cannot connect to itself".into(),
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::operation_hash;
    use crate::crypto::Keypair;

    fn membership(timestamp: i64) -> SignedOperation {
        SignedOperation::new(
            Operation::AddMembership {
                id: "u".into(),
                group: "g".into(),
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }

    #[test]
    fn test_version_check() {
        let mut op = membership(0);
        assert!(check_version(&op, 5).is_ok());
        op.v = 4;
        assert_eq!(
            check_version(&op, 5),
            Err(ValidationError::UnsupportedVersion(4))
        );
    }

    #[test]
    fn test_timestamp_skew_boundary() {
        let skew = 3_600_000;
        assert!(check_timestamp(&membership(1_000 + skew), 1_000, skew).is_ok());
        assert!(matches!(
            check_timestamp(&membership(1_001 + skew), 1_000, skew),
            Err(ValidationError::FutureTimestamp { .. })
        ));
    }

    #[test]
    fn test_hash_check() {
        let op = membership(10);
        let hash = operation_hash(&op).unwrap();
        assert!(check_hash(&op, &hash).is_ok());
        assert!(matches!(
            check_hash(&op, &OpHash::from_bytes([0; 32])),
            Err(ValidationError::HashMismatch { .. })
        ));
    }

    #[test]
    fn test_verify_with_keys_returns_matching_key() {
        let old = Keypair::from_seed(&[1; 32]);
        let new = Keypair::from_seed(&[2; 32]);
        let signer = IdentityId::from("u");
        let sig = new.sign(b"msg");

        let keys = [old.public_key(), new.public_key()];
        assert_eq!(
            verify_with_keys(&signer, b"msg", &sig, &keys).unwrap(),
            new.public_key()
        );
        assert!(verify_with_keys(&signer, b"msg", &sig, &keys[..1]).is_err());
    }

    #[test]
    fn test_recovery_signers() {
        let a = IdentityId::from("a");
        let b = IdentityId::from("b");
        let c = IdentityId::from("c");
        let recovery = vec![a.clone(), b.clone()];

        assert!(check_recovery_signers(&a, &b, &recovery).is_ok());
        assert!(check_recovery_signers(&a, &a, &recovery).is_err());
        assert!(check_recovery_signers(&a, &c, &recovery).is_err());
    }

    #[test]
    fn test_structure_rules() {
        let sponsor_both = SignedOperation::new(
            Operation::Sponsor {
                app: "app".into(),
                id: Some("u".into()),
                context_id: Some("x".into()),
                sig: Signature::ZERO,
            },
            0,
        );
        assert!(validate_structure(&sponsor_both).is_err());

        let sealed = SignedOperation::new(
            Operation::LinkContextId {
                id: None,
                context: "ctx".into(),
                context_id: None,
                encrypted: Some("blob".into()),
                sig: Signature::ZERO,
            },
            0,
        );
        assert!(validate_structure(&sealed).is_ok());

        let self_connect = SignedOperation::new(
            Operation::Connect {
                id1: "a".into(),
                id2: "a".into(),
                level: None,
                report_reason: None,
                replaced_with: None,
                request_proof: None,
                sig1: Signature::ZERO,
            },
            0,
        );
        assert!(validate_structure(&self_connect).is_err());
    }
}
