//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: identities that build and sign
//! operations, sponsoring apps, and a single node whose block time follows a
//! manual clock.

use std::sync::Arc;

use idchain_cipher::{seal_link, LinkPayload};
use idchain_core::canonical::{canonical_message, request_proof_message};
use idchain_core::{
    operation_hash, AppId, AppRecord, ConnectionLevel, ContextRecord, GroupId, GroupType,
    IdentityId, Keypair, Operation, PublicKey, Signature, SignedOperation,
};
use idchain_engine::{Engine, EngineConfig, FixedClock, OperationOutcome};
use idchain_store::MemoryStore;

/// Start time of every [`TestNet`] (2023-11-14T22:13:20Z).
pub const GENESIS: i64 = 1_700_000_000_000;

/// Deterministic keypair derived from a name.
pub fn named_keypair(name: &str) -> Keypair {
    let mut seed = [0u8; 32];
    for (i, b) in name.bytes().take(32).enumerate() {
        seed[i] = b;
    }
    Keypair::from_seed(&seed)
}

/// Fill the primary signature of an operation.
pub fn sign(op: SignedOperation, keypair: &Keypair) -> SignedOperation {
    let signature = sign_message(&op, keypair);
    let mut op = op;
    match &mut op.op {
        Operation::Connect { sig1, .. }
        | Operation::AddConnection { sig1, .. }
        | Operation::RemoveConnection { sig1, .. }
        | Operation::AddGroup { sig1, .. }
        | Operation::SetSigningKey { sig1, .. } => *sig1 = signature,
        Operation::RemoveGroup { sig, .. }
        | Operation::AddMembership { sig, .. }
        | Operation::RemoveMembership { sig, .. }
        | Operation::SetTrustedConnections { sig, .. }
        | Operation::Sponsor { sig, .. }
        | Operation::LinkContextId { sig, .. }
        | Operation::Invite { sig, .. }
        | Operation::Dismiss { sig, .. }
        | Operation::AddAdmin { sig, .. }
        | Operation::AddSigningKey { sig, .. }
        | Operation::RemoveSigningKey { sig, .. }
        | Operation::RemoveAllSigningKeys { sig, .. }
        | Operation::UpdateGroup { sig, .. } => *sig = signature,
    }
    op
}

/// Fill the second signature of a two-party operation.
pub fn countersign(op: SignedOperation, keypair: &Keypair) -> SignedOperation {
    let signature = sign_message(&op, keypair);
    let mut op = op;
    match &mut op.op {
        Operation::AddConnection { sig2, .. } | Operation::SetSigningKey { sig2, .. } => {
            *sig2 = signature
        }
        other => panic!("{} carries no second signature", other.name()),
    }
    op
}

fn sign_message(op: &SignedOperation, keypair: &Keypair) -> Signature {
    let message = canonical_message(op).expect("operation encodes");
    keypair.sign(message.as_bytes())
}

/// An identity with a signing key, able to build its own operations.
///
/// Every builder returns a signed operation without a block time.
#[derive(Debug, Clone)]
pub struct TestIdentity {
    pub keypair: Keypair,
}

impl TestIdentity {
    /// Identity with a deterministic key derived from `name`.
    pub fn named(name: &str) -> Self {
        Self {
            keypair: named_keypair(name),
        }
    }

    /// Identity with a random key.
    pub fn random() -> Self {
        Self {
            keypair: Keypair::from_seed(&rand::random::<[u8; 32]>()),
        }
    }

    /// Identity signing with `keypair`.
    pub fn with_keypair(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn id(&self) -> IdentityId {
        self.keypair.identity()
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// The same identity signing with another key.
    pub fn rekeyed(&self, keypair: Keypair) -> RekeyedIdentity {
        RekeyedIdentity {
            id: self.id(),
            keypair,
        }
    }

    fn signed(&self, op: Operation, timestamp: i64) -> SignedOperation {
        sign(SignedOperation::new(op, timestamp), &self.keypair)
    }

    /// Proof that this identity asked for a connection at `timestamp`.
    pub fn request_proof(&self, timestamp: i64) -> Signature {
        self.keypair
            .sign(request_proof_message(self.id().as_str(), timestamp).as_bytes())
    }

    pub fn connect(
        &self,
        other: &TestIdentity,
        level: Option<ConnectionLevel>,
        timestamp: i64,
    ) -> SignedOperation {
        self.signed(
            Operation::Connect {
                id1: self.id(),
                id2: other.id(),
                level,
                report_reason: None,
                replaced_with: None,
                request_proof: None,
                sig1: Signature::ZERO,
            },
            timestamp,
        )
    }

    /// Report `other`, optionally naming its replacement.
    pub fn report(
        &self,
        other: &TestIdentity,
        reason: &str,
        replaced_with: Option<&TestIdentity>,
        timestamp: i64,
    ) -> SignedOperation {
        self.signed(
            Operation::Connect {
                id1: self.id(),
                id2: other.id(),
                level: Some(ConnectionLevel::Reported),
                report_reason: Some(reason.to_owned()),
                replaced_with: replaced_with.map(TestIdentity::id),
                request_proof: None,
                sig1: Signature::ZERO,
            },
            timestamp,
        )
    }

    /// Connect with a request proof signed by `other`.
    pub fn connect_on_request(
        &self,
        other: &TestIdentity,
        level: ConnectionLevel,
        timestamp: i64,
    ) -> SignedOperation {
        self.signed(
            Operation::Connect {
                id1: self.id(),
                id2: other.id(),
                level: Some(level),
                report_reason: None,
                replaced_with: None,
                request_proof: Some(other.request_proof(timestamp)),
                sig1: Signature::ZERO,
            },
            timestamp,
        )
    }

    /// Legacy mutual connection, signed by both sides.
    pub fn add_connection(&self, other: &TestIdentity, timestamp: i64) -> SignedOperation {
        let op = self.signed(
            Operation::AddConnection {
                id1: self.id(),
                id2: other.id(),
                sig1: Signature::ZERO,
                sig2: Signature::ZERO,
            },
            timestamp,
        );
        countersign(op, &other.keypair)
    }

    pub fn remove_connection(
        &self,
        other: &TestIdentity,
        reason: Option<&str>,
        timestamp: i64,
    ) -> SignedOperation {
        self.signed(
            Operation::RemoveConnection {
                id1: self.id(),
                id2: other.id(),
                reason: reason.map(str::to_owned),
                sig1: Signature::ZERO,
            },
            timestamp,
        )
    }

    pub fn set_trusted(&self, trusted: &[&TestIdentity], timestamp: i64) -> SignedOperation {
        self.signed(
            Operation::SetTrustedConnections {
                id: self.id(),
                trusted: trusted.iter().map(|t| t.id()).collect(),
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }

    pub fn add_group(
        &self,
        group: &str,
        co_founders: [&TestIdentity; 2],
        group_type: GroupType,
        timestamp: i64,
    ) -> SignedOperation {
        self.signed(
            Operation::AddGroup {
                group: GroupId::from(group),
                id1: self.id(),
                id2: co_founders[0].id(),
                invite_data2: None,
                id3: co_founders[1].id(),
                invite_data3: None,
                url: None,
                group_type,
                sig1: Signature::ZERO,
            },
            timestamp,
        )
    }

    pub fn remove_group(&self, group: &str, timestamp: i64) -> SignedOperation {
        self.signed(
            Operation::RemoveGroup {
                id: self.id(),
                group: GroupId::from(group),
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }

    pub fn add_membership(&self, group: &str, timestamp: i64) -> SignedOperation {
        self.signed(
            Operation::AddMembership {
                id: self.id(),
                group: GroupId::from(group),
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }

    pub fn remove_membership(&self, group: &str, timestamp: i64) -> SignedOperation {
        self.signed(
            Operation::RemoveMembership {
                id: self.id(),
                group: GroupId::from(group),
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }

    pub fn invite(&self, invitee: &TestIdentity, group: &str, timestamp: i64) -> SignedOperation {
        self.signed(
            Operation::Invite {
                inviter: self.id(),
                invitee: invitee.id(),
                group: GroupId::from(group),
                data: None,
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }

    pub fn dismiss(&self, dismissee: &TestIdentity, group: &str, timestamp: i64) -> SignedOperation {
        self.signed(
            Operation::Dismiss {
                dismisser: self.id(),
                dismissee: dismissee.id(),
                group: GroupId::from(group),
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }

    pub fn add_admin(&self, admin: &TestIdentity, group: &str, timestamp: i64) -> SignedOperation {
        self.signed(
            Operation::AddAdmin {
                id: self.id(),
                admin: admin.id(),
                group: GroupId::from(group),
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }

    pub fn update_group(&self, group: &str, url: Option<&str>, timestamp: i64) -> SignedOperation {
        self.signed(
            Operation::UpdateGroup {
                id: self.id(),
                group: GroupId::from(group),
                url: url.map(str::to_owned),
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }

    pub fn link(&self, context: &str, context_id: &str, timestamp: i64) -> SignedOperation {
        self.signed(
            Operation::LinkContextId {
                id: Some(self.id()),
                context: context.to_owned(),
                context_id: Some(context_id.to_owned()),
                encrypted: None,
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }

    /// A link as a peer relays it for a context with a link secret.
    pub fn sealed_link(
        &self,
        context: &str,
        secret: &str,
        context_id: &str,
        timestamp: i64,
    ) -> SignedOperation {
        let mut op = self.link(context, context_id, timestamp);
        let encrypted = seal_link(
            context,
            secret,
            &LinkPayload::new(self.id(), context_id.to_owned()),
        )
        .expect("link seals");
        if let Operation::LinkContextId {
            id,
            context_id,
            encrypted: sealed,
            ..
        } = &mut op.op
        {
            *id = None;
            *context_id = None;
            *sealed = Some(encrypted);
        }
        op
    }

    pub fn add_signing_key(&self, key: PublicKey, timestamp: i64) -> SignedOperation {
        self.signed(
            Operation::AddSigningKey {
                id: self.id(),
                signing_key: key,
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }

    pub fn remove_signing_key(&self, key: PublicKey, timestamp: i64) -> SignedOperation {
        self.signed(
            Operation::RemoveSigningKey {
                id: self.id(),
                signing_key: key,
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }

    pub fn remove_all_signing_keys(&self, timestamp: i64) -> SignedOperation {
        self.signed(
            Operation::RemoveAllSigningKeys {
                id: self.id(),
                sig: Signature::ZERO,
            },
            timestamp,
        )
    }
}

/// An identity whose operations are signed with a key other than the one
/// its id derives from.
#[derive(Debug, Clone)]
pub struct RekeyedIdentity {
    pub id: IdentityId,
    pub keypair: Keypair,
}

impl RekeyedIdentity {
    pub fn add_membership(&self, group: &str, timestamp: i64) -> SignedOperation {
        sign(
            SignedOperation::new(
                Operation::AddMembership {
                    id: self.id.clone(),
                    group: GroupId::from(group),
                    sig: Signature::ZERO,
                },
                timestamp,
            ),
            &self.keypair,
        )
    }

    pub fn remove_all_signing_keys(&self, timestamp: i64) -> SignedOperation {
        sign(
            SignedOperation::new(
                Operation::RemoveAllSigningKeys {
                    id: self.id.clone(),
                    sig: Signature::ZERO,
                },
                timestamp,
            ),
            &self.keypair,
        )
    }
}

/// Key reset of `id` to `key`, co-signed by two recovery connections.
pub fn set_signing_key(
    id: &TestIdentity,
    key: PublicKey,
    signers: [&TestIdentity; 2],
    timestamp: i64,
) -> SignedOperation {
    let op = SignedOperation::new(
        Operation::SetSigningKey {
            id: id.id(),
            signing_key: key,
            id1: signers[0].id(),
            id2: signers[1].id(),
            sig1: Signature::ZERO,
            sig2: Signature::ZERO,
        },
        timestamp,
    );
    countersign(sign(op, &signers[0].keypair), &signers[1].keypair)
}

/// A sponsoring app with its own keypair.
#[derive(Debug, Clone)]
pub struct TestApp {
    pub id: AppId,
    pub keypair: Keypair,
}

impl TestApp {
    pub fn named(name: &str) -> Self {
        Self {
            id: AppId::from(name),
            keypair: named_keypair(&format!("app:{name}")),
        }
    }

    /// App record able to sponsor directly and relay for `context`.
    pub fn record(&self, context: Option<&str>, total_sponsorships: u64) -> AppRecord {
        AppRecord {
            id: self.id.clone(),
            context: context.map(str::to_owned),
            total_sponsorships,
            sponsor_public_key: Some(self.keypair.public_key()),
            sponsor_private_key: context.map(|_| self.keypair.secret_base64()),
        }
    }

    pub fn sponsor(&self, id: &TestIdentity, timestamp: i64) -> SignedOperation {
        self.sponsor_op(Some(id.id()), None, timestamp)
    }

    pub fn sponsor_context_id(&self, context_id: &str, timestamp: i64) -> SignedOperation {
        self.sponsor_op(None, Some(context_id.to_owned()), timestamp)
    }

    fn sponsor_op(
        &self,
        id: Option<IdentityId>,
        context_id: Option<String>,
        timestamp: i64,
    ) -> SignedOperation {
        sign(
            SignedOperation::new(
                Operation::Sponsor {
                    app: self.id.clone(),
                    id,
                    context_id,
                    sig: Signature::ZERO,
                },
                timestamp,
            ),
            &self.keypair,
        )
    }
}

/// A single node fed operations in submission order.
///
/// Each submitted operation gets the current clock reading as its block
/// time.
pub struct TestNet {
    pub engine: Engine<MemoryStore>,
    pub clock: Arc<FixedClock>,
}

impl TestNet {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let clock = Arc::new(FixedClock::new(GENESIS));
        Self {
            engine: Engine::with_clock(MemoryStore::new(), config, clock.clone()),
            clock,
        }
    }

    pub fn now(&self) -> i64 {
        use idchain_engine::Clock;
        self.clock.now_ms()
    }

    pub fn advance(&self, delta_ms: i64) {
        self.clock.advance(delta_ms);
    }

    /// Apply an operation at the current time under its own hash.
    pub async fn submit(&self, op: SignedOperation) -> OperationOutcome {
        let op = op.with_block_time(self.now());
        let hash = operation_hash(&op).expect("operation hashes");
        self.engine
            .apply_operation(hash, op)
            .await
            .expect("store available")
    }

    /// Submit and require the operation to apply.
    pub async fn apply(&self, op: SignedOperation) -> OperationOutcome {
        let name = op.name();
        let outcome = self.submit(op).await;
        assert_eq!(
            outcome.state,
            idchain_core::OperationState::Applied,
            "{name} failed: {:?}",
            outcome.result
        );
        outcome
    }

    /// Connect `a` and `b` to each other at `level`.
    pub async fn connect_both(&self, a: &TestIdentity, b: &TestIdentity, level: ConnectionLevel) {
        let now = self.now();
        self.apply(a.connect(b, Some(level), now)).await;
        self.apply(b.connect(a, Some(level), now)).await;
    }

    /// Found a group of three mutually connected identities and let the
    /// co-founders join.
    pub async fn found_group(&self, group: &str, founders: [&TestIdentity; 3], group_type: GroupType) {
        let [founder, second, third] = founders;
        for (a, b) in [(founder, second), (founder, third), (second, third)] {
            self.connect_both(a, b, ConnectionLevel::AlreadyKnown).await;
        }
        let now = self.now();
        self.apply(founder.add_group(group, [second, third], group_type, now))
            .await;
        self.apply(second.add_membership(group, now)).await;
        self.apply(third.add_membership(group, now)).await;
    }

    pub async fn register_app(&self, app: &AppRecord) {
        self.engine.register_app(app).await.expect("app registers");
    }

    pub async fn register_context(&self, name: &str, ids_as_hex: bool, link_secret: Option<&str>) {
        self.engine
            .register_context(&ContextRecord {
                name: name.to_owned(),
                ids_as_hex,
                link_secret: link_secret.map(str::to_owned),
            })
            .await
            .expect("context registers");
    }
}

impl Default for TestNet {
    fn default() -> Self {
        Self::new()
    }
}

/// `count` identities with distinct deterministic keys.
pub fn identities(count: u8) -> Vec<TestIdentity> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i;
            seed[31] = 0xA5;
            TestIdentity::with_keypair(Keypair::from_seed(&seed))
        })
        .collect()
}
