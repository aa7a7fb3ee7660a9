//! The session-key message shared with room members.
//!
//! Carries everything a member needs to start decrypting a group session:
//! the room, the session id, and the ratchet's (chain key, index) export.
//! It travels as the content of an `m.room_key` event, itself encrypted
//! over a pairwise session, so the chain key never touches the wire in
//! the clear.

use rampart_crypto::{KeyError, base64_decode, base64_encode};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::GroupSessionError;

/// Event type under which session keys are shared.
pub const ROOM_KEY_EVENT_TYPE: &str = "m.room_key";

/// An exported group ratchet state, addressed to one room member.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKeyMessage {
    /// Id of the group session being shared
    pub session_id: String,
    /// Room the session encrypts
    pub room_id: String,
    /// Exported chain key
    pub chain_key: [u8; 32],
    /// Index the chain key is exported at; the importer can decrypt this
    /// index and everything after it
    pub message_index: u32,
}

#[derive(Serialize, Deserialize)]
struct WireSessionKey {
    algorithm: String,
    room_id: String,
    session_id: String,
    session_key: String,
    #[serde(default)]
    message_index: u32,
}

impl SessionKeyMessage {
    /// Serialize as `m.room_key` event content.
    pub fn to_event_content(&self, algorithm: &str) -> serde_json::Value {
        let wire = WireSessionKey {
            algorithm: algorithm.to_string(),
            room_id: self.room_id.clone(),
            session_id: self.session_id.clone(),
            session_key: base64_encode(self.chain_key),
            message_index: self.message_index,
        };
        let Ok(value) = serde_json::to_value(wire) else {
            unreachable!("session key content has no unserializable members");
        };
        value
    }

    /// Parse from `m.room_key` event content.
    pub fn from_event_content(content: &serde_json::Value) -> Result<Self, GroupSessionError> {
        let wire: WireSessionKey = serde_json::from_value(content.clone())
            .map_err(|e| GroupSessionError::MalformedSessionKey { reason: e.to_string() })?;

        let decoded = base64_decode(&wire.session_key)
            .map_err(|e| GroupSessionError::MalformedSessionKey { reason: e.to_string() })?;
        let chain_key: [u8; 32] = decoded.try_into().map_err(|_| {
            GroupSessionError::MalformedSessionKey {
                reason: KeyError::InvalidLength { expected: 32, actual: wire.session_key.len() }
                    .to_string(),
            }
        })?;

        Ok(Self {
            session_id: wire.session_id,
            room_id: wire.room_id,
            chain_key,
            message_index: wire.message_index,
        })
    }
}

impl Drop for SessionKeyMessage {
    fn drop(&mut self) {
        self.chain_key.zeroize();
    }
}

impl std::fmt::Debug for SessionKeyMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeyMessage")
            .field("session_id", &self.session_id)
            .field("room_id", &self.room_id)
            .field("message_index", &self.message_index)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> SessionKeyMessage {
        SessionKeyMessage {
            session_id: "session".to_string(),
            room_id: "!room:server".to_string(),
            chain_key: [0x5A; 32],
            message_index: 7,
        }
    }

    #[test]
    fn event_content_roundtrip() {
        let message = sample();
        let content = message.to_event_content("m.megolm.v1.xchacha20");

        assert_eq!(content["algorithm"], "m.megolm.v1.xchacha20");
        assert_eq!(content["room_id"], "!room:server");
        assert_eq!(SessionKeyMessage::from_event_content(&content).unwrap(), message);
    }

    #[test]
    fn missing_fields_are_rejected() {
        let err = SessionKeyMessage::from_event_content(&json!({"room_id": "!r:s"})).unwrap_err();
        assert!(matches!(err, GroupSessionError::MalformedSessionKey { .. }));
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        let content = json!({
            "algorithm": "m.megolm.v1.xchacha20",
            "room_id": "!room:server",
            "session_id": "session",
            "session_key": base64_encode([0u8; 16]),
            "message_index": 0,
        });

        let err = SessionKeyMessage::from_event_content(&content).unwrap_err();
        assert!(matches!(err, GroupSessionError::MalformedSessionKey { .. }));
    }

    #[test]
    fn debug_does_not_leak_the_chain_key() {
        let rendered = format!("{:?}", sample());
        assert!(!rendered.contains("5A"));
        assert!(!rendered.contains("90")); // 0x5A in decimal
    }
}
