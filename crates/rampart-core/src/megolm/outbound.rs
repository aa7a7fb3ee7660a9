//! The sender side of a group session.

use rampart_crypto::{GroupRatchet, aead, base64_encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::{GroupSessionError, MegolmMessage, SessionKeyMessage, group_associated_data};

/// A group session this device sends on.
///
/// One exists per encrypted room at a time; rotating a room's session
/// means creating a fresh one and re-sharing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundGroupSession {
    session_id: String,
    room_id: String,
    ratchet: GroupRatchet,
}

impl OutboundGroupSession {
    /// Create a fresh session for a room, at index 0.
    pub fn new(room_id: impl Into<String>) -> Self {
        let mut rng = rand::rngs::OsRng;

        let mut id_bytes = [0u8; 16];
        rng.fill_bytes(&mut id_bytes);
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);

        Self {
            session_id: base64_encode(id_bytes),
            room_id: room_id.into(),
            ratchet: GroupRatchet::new(seed),
        }
    }

    /// Session id, unique per (device, room, rotation).
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The room this session encrypts.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Index the next encrypted message will carry.
    pub fn message_index(&self) -> u32 {
        self.ratchet.index()
    }

    /// Encrypt a message, advancing the ratchet one step.
    ///
    /// The ciphertext is bound to the session id, the index and the room,
    /// so it cannot be replayed into another context.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<MegolmMessage, GroupSessionError> {
        let key = self.ratchet.advance()?;
        let message_index = key.index();

        let mut suffix = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut suffix);

        let associated_data = group_associated_data(&self.session_id, message_index, &self.room_id);
        let sealed = aead::seal(plaintext, &key, &associated_data, suffix);
        Ok(MegolmMessage { message_index, sealed })
    }

    /// Export the current ratchet state for sharing with a member.
    ///
    /// The importer can decrypt from the current index forward; messages
    /// already sent stay out of reach.
    pub fn export(&self) -> SessionKeyMessage {
        let (chain_key, message_index) = self.ratchet.export();
        SessionKeyMessage {
            session_id: self.session_id.clone(),
            room_id: self.room_id.clone(),
            chain_key,
            message_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_advance_per_message() {
        let mut session = OutboundGroupSession::new("!room:server");

        assert_eq!(session.message_index(), 0);
        let first = session.encrypt(b"one").unwrap();
        let second = session.encrypt(b"two").unwrap();

        assert_eq!(first.message_index, 0);
        assert_eq!(second.message_index, 1);
        assert_eq!(session.message_index(), 2);
    }

    #[test]
    fn export_tracks_the_current_index() {
        let mut session = OutboundGroupSession::new("!room:server");
        session.encrypt(b"before export").unwrap();

        let export = session.export();
        assert_eq!(export.message_index, 1);
        assert_eq!(export.session_id, session.session_id());
        assert_eq!(export.room_id, "!room:server");
    }

    #[test]
    fn fresh_sessions_have_distinct_ids() {
        let a = OutboundGroupSession::new("!room:server");
        let b = OutboundGroupSession::new("!room:server");
        assert_ne!(a.session_id(), b.session_id());
    }
}
