//! Wire formats for pairwise messages.
//!
//! Two message types exist on the wire. A pre-key message carries the
//! full handshake header (identity key, ephemeral base key, the targeted
//! one-time key) alongside the first ratchet message, and is re-sent
//! until the peer answers. A normal message is just the ratchet message.
//! Bodies are CBOR, then base64 inside the event envelope.

use rampart_crypto::{Curve25519PublicKey, RatchetMessage, base64_decode, base64_encode};
use serde::{Deserialize, Serialize};

use super::SessionError;

/// Message type discriminant for pre-key messages.
pub const PRE_KEY_MESSAGE_TYPE: u8 = 0;
/// Message type discriminant for normal messages.
pub const NORMAL_MESSAGE_TYPE: u8 = 1;

/// A handshake message: ratchet message plus the triple-DH public keys
/// the responder needs to derive the shared secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyMessage {
    /// Initiator's Curve25519 identity key
    pub identity_key: Curve25519PublicKey,
    /// Initiator's ephemeral base key
    pub base_key: Curve25519PublicKey,
    /// The responder one-time key this handshake targets
    pub one_time_key: Curve25519PublicKey,
    /// The first ratchet message of the session
    pub message: RatchetMessage,
}

/// A pairwise message in either phase of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OlmMessage {
    /// Handshake phase: header keys attached
    PreKey(PreKeyMessage),
    /// Established phase
    Normal(RatchetMessage),
}

impl OlmMessage {
    /// Wire discriminant for this message.
    pub fn message_type(&self) -> u8 {
        match self {
            Self::PreKey(_) => PRE_KEY_MESSAGE_TYPE,
            Self::Normal(_) => NORMAL_MESSAGE_TYPE,
        }
    }

    /// Serialize the body to CBOR.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        let result = match self {
            Self::PreKey(message) => ciborium::ser::into_writer(message, &mut bytes),
            Self::Normal(message) => ciborium::ser::into_writer(message, &mut bytes),
        };
        let Ok(()) = result else {
            unreachable!("message types serialize infallibly to a Vec");
        };
        bytes
    }

    /// Parse a body of the given wire type.
    pub fn from_bytes(message_type: u8, bytes: &[u8]) -> Result<Self, SessionError> {
        match message_type {
            PRE_KEY_MESSAGE_TYPE => ciborium::de::from_reader(bytes)
                .map(Self::PreKey)
                .map_err(|e| SessionError::MalformedMessage { reason: e.to_string() }),
            NORMAL_MESSAGE_TYPE => ciborium::de::from_reader(bytes)
                .map(Self::Normal)
                .map_err(|e| SessionError::MalformedMessage { reason: e.to_string() }),
            other => Err(SessionError::MalformedMessage {
                reason: format!("unknown message type {other}"),
            }),
        }
    }

    /// Encode for the event envelope: wire type plus base64 body.
    pub fn to_parts(&self) -> (u8, String) {
        (self.message_type(), base64_encode(self.to_bytes()))
    }

    /// Decode from envelope parts.
    pub fn from_parts(message_type: u8, body: &str) -> Result<Self, SessionError> {
        let bytes = base64_decode(body)
            .map_err(|e| SessionError::MalformedMessage { reason: e.to_string() })?;
        Self::from_bytes(message_type, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use rampart_crypto::{Curve25519SecretKey, DoubleRatchet, triple_dh_outbound};

    use super::*;

    fn sample_ratchet_message() -> RatchetMessage {
        let identity = Curve25519SecretKey::generate();
        let base = Curve25519SecretKey::generate();
        let their_identity = Curve25519SecretKey::generate().public_key();
        let their_one_time = Curve25519SecretKey::generate().public_key();

        let shared =
            triple_dh_outbound(&identity, &base, &their_identity, &their_one_time).unwrap();
        let mut ratchet = DoubleRatchet::init_outbound(&shared, their_one_time).unwrap();
        ratchet.encrypt(b"wire format test", [7; 8]).unwrap()
    }

    #[test]
    fn normal_message_roundtrip() {
        let message = OlmMessage::Normal(sample_ratchet_message());

        let (message_type, body) = message.to_parts();
        assert_eq!(message_type, NORMAL_MESSAGE_TYPE);

        let parsed = OlmMessage::from_parts(message_type, &body).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn pre_key_message_roundtrip() {
        let message = OlmMessage::PreKey(PreKeyMessage {
            identity_key: Curve25519SecretKey::generate().public_key(),
            base_key: Curve25519SecretKey::generate().public_key(),
            one_time_key: Curve25519SecretKey::generate().public_key(),
            message: sample_ratchet_message(),
        });

        let (message_type, body) = message.to_parts();
        assert_eq!(message_type, PRE_KEY_MESSAGE_TYPE);

        let parsed = OlmMessage::from_parts(message_type, &body).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let err = OlmMessage::from_parts(2, "AAAA").unwrap_err();
        assert!(matches!(err, SessionError::MalformedMessage { .. }));
    }

    #[test]
    fn garbage_body_is_rejected() {
        let err = OlmMessage::from_parts(NORMAL_MESSAGE_TYPE, "not base64 !!!").unwrap_err();
        assert!(matches!(err, SessionError::MalformedMessage { .. }));

        let garbage = base64_encode([0xFF; 16]);
        let err = OlmMessage::from_parts(NORMAL_MESSAGE_TYPE, &garbage).unwrap_err();
        assert!(matches!(err, SessionError::MalformedMessage { .. }));
    }
}
