//! The wire form of an encrypted event.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EventError;

/// Algorithm identifier for pairwise-encrypted events.
pub const OLM_ALGORITHM: &str = "m.olm.v1.curve25519-xchacha20";

/// Algorithm identifier for group-encrypted room events.
pub const MEGOLM_ALGORITHM: &str = "m.megolm.v1.xchacha20";

/// The encryption algorithms this implementation speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Pairwise, device to device
    Olm,
    /// Group, fanned out to a room
    Megolm,
}

impl Algorithm {
    /// Parse a declared algorithm, rejecting anything unknown.
    pub fn parse(algorithm: &str) -> Result<Self, EventError> {
        match algorithm {
            OLM_ALGORITHM => Ok(Self::Olm),
            MEGOLM_ALGORITHM => Ok(Self::Megolm),
            other => Err(EventError::UnknownAlgorithm { algorithm: other.to_string() }),
        }
    }

    /// The wire identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Olm => OLM_ALGORITHM,
            Self::Megolm => MEGOLM_ALGORITHM,
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recipient's ciphertext in a pairwise event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OlmPayload {
    /// Wire message type: 0 for pre-key, 1 for normal
    #[serde(rename = "type")]
    pub message_type: u8,
    /// Base64 message body
    pub body: String,
}

/// The ciphertext member, shaped by algorithm.
///
/// Pairwise events carry one payload per recipient device, keyed by the
/// recipient's Curve25519 identity key; group events carry a single
/// base64 string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CiphertextInfo {
    /// Pairwise: per-recipient payloads
    Olm(BTreeMap<String, OlmPayload>),
    /// Group: one shared ciphertext
    Megolm(String),
}

/// Content of an `m.room.encrypted` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedContent {
    /// Declared encryption algorithm
    pub algorithm: String,
    /// The ciphertext, shaped by algorithm
    pub ciphertext: CiphertextInfo,
    /// Sender device's Curve25519 identity key, base64
    pub sender_key: String,
    /// Sender's device id (group events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Group session id (group events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Relation, kept in cleartext so servers can aggregate
    #[serde(rename = "m.relates_to", default, skip_serializing_if = "Option::is_none")]
    pub relates_to: Option<Value>,
}

/// Cleartext server-attached metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedData {
    /// Event id this event redacts, for encrypted redactions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<String>,
}

/// A full `m.room.encrypted` event as received from the server.
///
/// The routing metadata is optional because the same shape carries both
/// room events (which have it) and to-device events (which do not).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Server-assigned event id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Sending user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Server timestamp, milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_server_ts: Option<u64>,
    /// Room the event was sent to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    /// Encrypted content
    pub content: EncryptedContent,
    /// Cleartext metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<UnsignedData>,
}

impl EncryptedEnvelope {
    /// Parse an envelope from event JSON.
    ///
    /// The algorithm is checked before the rest of the structure, so an
    /// event in a format this implementation does not speak reports
    /// [`EventError::UnknownAlgorithm`] rather than a parse failure.
    pub fn from_json(value: &Value) -> Result<Self, EventError> {
        let algorithm = value
            .get("content")
            .and_then(|content| content.get("algorithm"))
            .and_then(Value::as_str)
            .ok_or_else(|| EventError::MalformedEvent {
                reason: "missing content.algorithm".to_string(),
            })?;
        Algorithm::parse(algorithm)?;

        serde_json::from_value(value.clone())
            .map_err(|e| EventError::MalformedEvent { reason: e.to_string() })
    }

    /// The declared algorithm.
    pub fn algorithm(&self) -> Result<Algorithm, EventError> {
        Algorithm::parse(&self.content.algorithm)
    }
}
