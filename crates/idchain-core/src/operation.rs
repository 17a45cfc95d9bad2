//! Operations: signed requests to mutate the trust graph.
//!
//! An operation travels as a flat JSON object whose `name` field selects the
//! kind. [`Operation`] is the closed set of kinds; [`SignedOperation`] adds
//! the fields every kind shares.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::UNSIGNED_FIELDS;
use crate::crypto::{PublicKey, Signature};
use crate::error::{CoreError, Result};
use crate::model::{ConnectionLevel, GroupType};
use crate::types::{AppId, GroupId, IdentityId};

/// Protocol version this crate produces and accepts.
pub const OPERATION_VERSION: u32 = 5;

/// An operation together with its version, client timestamp and the
/// consensus timestamp assigned by the block that carried it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOperation {
    pub v: u32,
    /// Client-claimed time (Unix ms). Covered by the signatures.
    pub timestamp: i64,
    #[serde(flatten)]
    pub op: Operation,
    /// Block time (Unix ms). Not signed; the only clock handlers use.
    #[serde(rename = "blockTime", default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<i64>,
}

impl SignedOperation {
    /// Wrap an operation at the current protocol version.
    pub fn new(op: Operation, timestamp: i64) -> Self {
        Self {
            v: OPERATION_VERSION,
            timestamp,
            op,
            block_time: None,
        }
    }

    /// Decode an operation from its wire object.
    ///
    /// The canonical message is rebuilt from the typed operation, so a field
    /// the kind does not define would be signed by the client yet missing
    /// from the message hashed here. Such operations are rejected, as are
    /// optional fields sent as `null`.
    pub fn from_wire(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| CoreError::DecodingError("operation is not a JSON object".into()))?;
        let op: SignedOperation = serde_json::from_value(value.clone())
            .map_err(|e| CoreError::DecodingError(e.to_string()))?;

        let typed = serde_json::to_value(&op).map_err(|e| CoreError::EncodingError(e.to_string()))?;
        let known = typed
            .as_object()
            .ok_or_else(|| CoreError::EncodingError("operation is not a JSON object".into()))?;
        if let Some(field) = object
            .keys()
            .find(|k| !known.contains_key(*k) && !UNSIGNED_FIELDS.contains(&k.as_str()))
        {
            return Err(CoreError::DecodingError(format!(
                "unknown field `{field}` in {}",
                op.name()
            )));
        }
        Ok(op)
    }

    /// Set the consensus timestamp.
    pub fn with_block_time(mut self, block_time: i64) -> Self {
        self.block_time = Some(block_time);
        self
    }

    pub fn name(&self) -> &'static str {
        self.op.name()
    }
}

/// Every kind of graph mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum Operation {
    #[serde(rename = "Connect", rename_all = "camelCase")]
    Connect {
        id1: IdentityId,
        id2: IdentityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        level: Option<ConnectionLevel>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report_reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        replaced_with: Option<IdentityId>,
        /// Signature by `id2` over `"<id2>|<timestamp>"`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_proof: Option<Signature>,
        sig1: Signature,
    },

    /// Legacy two-sided connection.
    #[serde(rename = "Add Connection", rename_all = "camelCase")]
    AddConnection {
        id1: IdentityId,
        id2: IdentityId,
        sig1: Signature,
        sig2: Signature,
    },

    /// Legacy report.
    #[serde(rename = "Remove Connection", rename_all = "camelCase")]
    RemoveConnection {
        id1: IdentityId,
        id2: IdentityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        sig1: Signature,
    },

    #[serde(rename = "Add Group", rename_all = "camelCase")]
    AddGroup {
        group: GroupId,
        id1: IdentityId,
        id2: IdentityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invite_data2: Option<String>,
        id3: IdentityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invite_data3: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(rename = "type")]
        group_type: GroupType,
        sig1: Signature,
    },

    #[serde(rename = "Remove Group", rename_all = "camelCase")]
    RemoveGroup {
        id: IdentityId,
        group: GroupId,
        sig: Signature,
    },

    #[serde(rename = "Add Membership", rename_all = "camelCase")]
    AddMembership {
        id: IdentityId,
        group: GroupId,
        sig: Signature,
    },

    #[serde(rename = "Remove Membership", rename_all = "camelCase")]
    RemoveMembership {
        id: IdentityId,
        group: GroupId,
        sig: Signature,
    },

    /// Legacy bulk recovery assignment.
    #[serde(rename = "Set Trusted Connections", rename_all = "camelCase")]
    SetTrustedConnections {
        id: IdentityId,
        trusted: Vec<IdentityId>,
        sig: Signature,
    },

    /// Key reset signed by two recovery connections of `id`.
    #[serde(rename = "Set Signing Key", rename_all = "camelCase")]
    SetSigningKey {
        id: IdentityId,
        signing_key: PublicKey,
        id1: IdentityId,
        id2: IdentityId,
        sig1: Signature,
        sig2: Signature,
    },

    /// Either `id` (direct) or `context_id` (relayed) is present.
    #[serde(rename = "Sponsor", rename_all = "camelCase")]
    Sponsor {
        app: AppId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<IdentityId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_id: Option<String>,
        sig: Signature,
    },

    /// Either `id` and `context_id`, or `encrypted` when sealed.
    #[serde(rename = "Link ContextId", rename_all = "camelCase")]
    LinkContextId {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<IdentityId>,
        context: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        context_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encrypted: Option<String>,
        sig: Signature,
    },

    #[serde(rename = "Invite", rename_all = "camelCase")]
    Invite {
        inviter: IdentityId,
        invitee: IdentityId,
        group: GroupId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        sig: Signature,
    },

    #[serde(rename = "Dismiss", rename_all = "camelCase")]
    Dismiss {
        dismisser: IdentityId,
        dismissee: IdentityId,
        group: GroupId,
        sig: Signature,
    },

    #[serde(rename = "Add Admin", rename_all = "camelCase")]
    AddAdmin {
        id: IdentityId,
        admin: IdentityId,
        group: GroupId,
        sig: Signature,
    },

    #[serde(rename = "Add Signing Key", rename_all = "camelCase")]
    AddSigningKey {
        id: IdentityId,
        signing_key: PublicKey,
        sig: Signature,
    },

    #[serde(rename = "Remove Signing Key", rename_all = "camelCase")]
    RemoveSigningKey {
        id: IdentityId,
        signing_key: PublicKey,
        sig: Signature,
    },

    #[serde(rename = "Remove All Signing Keys", rename_all = "camelCase")]
    RemoveAllSigningKeys { id: IdentityId, sig: Signature },

    #[serde(rename = "Update Group", rename_all = "camelCase")]
    UpdateGroup {
        id: IdentityId,
        group: GroupId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        sig: Signature,
    },
}

impl Operation {
    /// Wire name of the operation kind.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Connect { .. } => "Connect",
            Operation::AddConnection { .. } => "Add Connection",
            Operation::RemoveConnection { .. } => "Remove Connection",
            Operation::AddGroup { .. } => "Add Group",
            Operation::RemoveGroup { .. } => "Remove Group",
            Operation::AddMembership { .. } => "Add Membership",
            Operation::RemoveMembership { .. } => "Remove Membership",
            Operation::SetTrustedConnections { .. } => "Set Trusted Connections",
            Operation::SetSigningKey { .. } => "Set Signing Key",
            Operation::Sponsor { .. } => "Sponsor",
            Operation::LinkContextId { .. } => "Link ContextId",
            Operation::Invite { .. } => "Invite",
            Operation::Dismiss { .. } => "Dismiss",
            Operation::AddAdmin { .. } => "Add Admin",
            Operation::AddSigningKey { .. } => "Add Signing Key",
            Operation::RemoveSigningKey { .. } => "Remove Signing Key",
            Operation::RemoveAllSigningKeys { .. } => "Remove All Signing Keys",
            Operation::UpdateGroup { .. } => "Update Group",
        }
    }

    /// Keys of the parties an operation is submitted on behalf of.
    ///
    /// For sponsorships this is the app id, which never names an identity.
    pub fn senders(&self) -> Vec<&str> {
        match self {
            Operation::Connect { id1, .. }
            | Operation::RemoveConnection { id1, .. }
            | Operation::AddGroup { id1, .. } => vec![id1.as_str()],
            Operation::AddConnection { id1, id2, .. } => vec![id1.as_str(), id2.as_str()],
            Operation::RemoveGroup { id, .. }
            | Operation::AddMembership { id, .. }
            | Operation::RemoveMembership { id, .. }
            | Operation::SetTrustedConnections { id, .. }
            | Operation::SetSigningKey { id, .. }
            | Operation::AddAdmin { id, .. }
            | Operation::AddSigningKey { id, .. }
            | Operation::RemoveSigningKey { id, .. }
            | Operation::RemoveAllSigningKeys { id, .. }
            | Operation::UpdateGroup { id, .. } => vec![id.as_str()],
            Operation::LinkContextId { id, .. } => id.iter().map(|id| id.as_str()).collect(),
            Operation::Sponsor { app, .. } => vec![app.as_str()],
            Operation::Invite { inviter, .. } => vec![inviter.as_str()],
            Operation::Dismiss { dismisser, .. } => vec![dismisser.as_str()],
        }
    }

    /// Whether this is a link whose identity and context id are sealed.
    pub fn is_sealed_link(&self) -> bool {
        matches!(
            self,
            Operation::LinkContextId {
                encrypted: Some(_),
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sig() -> Signature {
        Signature::from_bytes([7u8; 64])
    }

    #[test]
    fn test_operation_wire_shape() {
        let op = SignedOperation::new(
            Operation::Invite {
                inviter: "a".into(),
                invitee: "b".into(),
                group: "g".into(),
                data: Some("payload".into()),
                sig: sig(),
            },
            10,
        )
        .with_block_time(20);

        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["name"], "Invite");
        assert_eq!(value["v"], 5);
        assert_eq!(value["timestamp"], 10);
        assert_eq!(value["blockTime"], 20);
        assert_eq!(value["inviter"], "a");
        assert_eq!(value["data"], "payload");
    }

    #[test]
    fn test_camel_case_fields() {
        let value = json!({
            "name": "Add Group",
            "v": 5,
            "timestamp": 1,
            "group": "g",
            "id1": "a",
            "id2": "b",
            "inviteData2": "x",
            "id3": "c",
            "inviteData3": "y",
            "type": "primary",
            "sig1": sig().to_base64(),
        });
        let op: SignedOperation = serde_json::from_value(value).unwrap();
        match &op.op {
            Operation::AddGroup {
                invite_data2,
                group_type,
                url,
                ..
            } => {
                assert_eq!(invite_data2.as_deref(), Some("x"));
                assert_eq!(*group_type, GroupType::Primary);
                assert!(url.is_none());
            }
            other => panic!("unexpected operation {other:?}"),
        }
        assert!(op.block_time.is_none());
    }

    #[test]
    fn test_wire_decoding_rejects_unknown_fields() {
        let mut value = json!({
            "name": "Invite",
            "v": 5,
            "timestamp": 1,
            "inviter": "a",
            "invitee": "b",
            "group": "g",
            "sig": sig().to_base64(),
            "hash": "ignored",
        });
        let op = SignedOperation::from_wire(&value).unwrap();
        assert_eq!(op.name(), "Invite");

        value["memo"] = json!("signed but unknown");
        let err = SignedOperation::from_wire(&value).unwrap_err();
        assert!(err.to_string().contains("memo"));
        // Plain serde drops the field silently.
        assert!(serde_json::from_value::<SignedOperation>(value.clone()).is_ok());

        value.as_object_mut().unwrap().remove("memo");
        value["data"] = Value::Null;
        assert!(SignedOperation::from_wire(&value).is_err());
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let value = json!({"name": "Teleport", "v": 5, "timestamp": 1});
        assert!(serde_json::from_value::<SignedOperation>(value).is_err());
    }

    #[test]
    fn test_senders() {
        let op = Operation::AddConnection {
            id1: "a".into(),
            id2: "b".into(),
            sig1: sig(),
            sig2: sig(),
        };
        assert_eq!(op.senders(), vec!["a", "b"]);

        let sealed = Operation::LinkContextId {
            id: None,
            context: "ctx".into(),
            context_id: None,
            encrypted: Some("xyz".into()),
            sig: sig(),
        };
        assert!(sealed.senders().is_empty());
        assert!(sealed.is_sealed_link());
    }
}
