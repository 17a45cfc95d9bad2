//! Proptest generators for property-based testing.

use proptest::prelude::*;

use idchain_core::{
    ConnectionLevel, GroupId, GroupType, Keypair, Operation, PublicKey, Signature, SignedOperation,
};

use crate::fixtures::sign;

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random public key.
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a reasonable client timestamp (2020 to 2040).
pub fn timestamp() -> impl Strategy<Value = i64> {
    1_577_836_800_000i64..=2_208_988_800_000
}

/// Generate a connection level.
pub fn connection_level() -> impl Strategy<Value = ConnectionLevel> {
    prop_oneof![
        Just(ConnectionLevel::Reported),
        Just(ConnectionLevel::JustMet),
        Just(ConnectionLevel::AlreadyKnown),
        Just(ConnectionLevel::Recovery),
    ]
}

/// Generate a group type.
pub fn group_type() -> impl Strategy<Value = GroupType> {
    prop_oneof![Just(GroupType::General), Just(GroupType::Primary)]
}

/// Generate a hex context id, in mixed case.
pub fn hex_context_id() -> impl Strategy<Value = String> {
    "0x[0-9a-fA-F]{8,40}"
}

/// Generate a group key.
pub fn group_id() -> impl Strategy<Value = GroupId> {
    "[a-z0-9]{1,16}".prop_map(GroupId::from)
}

/// Generate a signed "Add Membership" by a random identity.
pub fn membership_operation() -> impl Strategy<Value = (Keypair, SignedOperation)> {
    (keypair(), group_id(), timestamp()).prop_map(|(keypair, group, timestamp)| {
        let op = SignedOperation::new(
            Operation::AddMembership {
                id: keypair.identity(),
                group,
                sig: Signature::ZERO,
            },
            timestamp,
        );
        let op = sign(op, &keypair);
        (keypair, op)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use idchain_core::canonical::canonical_message;
    use idchain_core::operation_hash;

    proptest! {
        #[test]
        fn hash_ignores_block_time((_, op) in membership_operation(), block_time in timestamp()) {
            let with_time = op.clone().with_block_time(block_time);
            prop_assert_eq!(operation_hash(&op).unwrap(), operation_hash(&with_time).unwrap());
        }

        #[test]
        fn signature_verifies_under_derived_key((keypair, op) in membership_operation()) {
            let message = canonical_message(&op).unwrap();
            let Operation::AddMembership { id, sig, .. } = &op.op else {
                unreachable!();
            };
            let key = PublicKey::from_identity(id).unwrap();
            prop_assert_eq!(key, keypair.public_key());
            prop_assert!(key.verify(message.as_bytes(), sig).is_ok());
        }
    }
}
