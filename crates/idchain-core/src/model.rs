//! Records of the trust graph.
//!
//! Documents are keyed by their identifier; edge bodies carry only the
//! attributes beyond (from, to, timestamp), which the store keeps itself.

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::operation::SignedOperation;
use crate::types::{AppId, GroupId, IdentityId, OpHash};

/// Report reason that requires a replacement identity.
pub const REPLACED_REASON: &str = "replaced";

/// An identity document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: IdentityId,
    /// Currently valid signing keys, most recent first.
    pub signing_keys: Vec<PublicKey>,
    pub created_at: i64,
    /// First verified identity that connected to this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<IdentityId>,
    /// Best-effort index of groups this identity could join. Never authoritative.
    #[serde(default)]
    pub eligible_groups: Vec<GroupId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<i64>,
}

/// Trust level of a directed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionLevel {
    #[serde(rename = "reported")]
    Reported,
    #[serde(rename = "just met")]
    JustMet,
    #[serde(rename = "already known")]
    AlreadyKnown,
    #[serde(rename = "recovery")]
    Recovery,
}

impl ConnectionLevel {
    /// Levels that count towards group eligibility of outsiders.
    pub fn is_known(self) -> bool {
        matches!(
            self,
            ConnectionLevel::JustMet | ConnectionLevel::AlreadyKnown | ConnectionLevel::Recovery
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionLevel::Reported => "reported",
            ConnectionLevel::JustMet => "just met",
            ConnectionLevel::AlreadyKnown => "already known",
            ConnectionLevel::Recovery => "recovery",
        }
    }
}

/// Body of a connection edge (current or history).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub level: ConnectionLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_with: Option<IdentityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_proof: Option<crate::crypto::Signature>,
}

/// Kind of group. An identity may belong to at most one primary group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    #[default]
    General,
    Primary,
}

/// A group document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub id: GroupId,
    #[serde(rename = "type", default)]
    pub group_type: GroupType,
    /// The three founders in canonical (sorted) order.
    pub founders: Vec<IdentityId>,
    pub admins: Vec<IdentityId>,
    pub is_new: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub timestamp: i64,
}

impl GroupRecord {
    pub fn is_admin(&self, id: &IdentityId) -> bool {
        self.admins.contains(id)
    }

    pub fn is_founder(&self, id: &IdentityId) -> bool {
        self.founders.contains(id)
    }
}

/// Body of an invitation edge (identity -> group).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationRecord {
    pub inviter: IdentityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// An application namespace that identities link external ids into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextRecord {
    pub name: String,
    /// Context ids are hex and compared case-insensitively.
    #[serde(default)]
    pub ids_as_hex: bool,
    /// Secret the link audit trail is sealed with, if the context wants one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_secret: Option<String>,
}

/// A sponsoring application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
    pub id: AppId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub total_sponsorships: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor_public_key: Option<PublicKey>,
    /// Base64 secret used to relay sponsor requests by context id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor_private_key: Option<String>,
}

/// Body of a context-link edge (identity -> context id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextLinkRecord {
    pub context: String,
}

/// Body of a sponsorship placeholder edge (context id -> app).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSponsorshipRecord {
    pub expires_at: i64,
}

/// Body of a test marker edge (context id -> app).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestblockRecord {
    pub action: String,
}

/// Disposition of an operation in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    /// Constructed locally, waiting to be broadcast.
    Init,
    /// Broadcast, waiting for consensus.
    Sent,
    Applied,
    Failed,
    Ignored,
    Duplicate,
}

impl OperationState {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationState::Init => "init",
            OperationState::Sent => "sent",
            OperationState::Applied => "applied",
            OperationState::Failed => "failed",
            OperationState::Ignored => "ignored",
            OperationState::Duplicate => "duplicate",
        }
    }
}

/// A ledger entry keyed by operation hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub hash: OpHash,
    pub operation: SignedOperation,
    pub state: OperationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}
