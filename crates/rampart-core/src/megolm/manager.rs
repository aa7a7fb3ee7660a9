//! Ownership of all group sessions on a device.

use std::collections::HashMap;

use rampart_crypto::{Curve25519PublicKey, PickleError, open_pickle, seal_pickle};
use serde::{Deserialize, Serialize};

use super::{
    GroupSessionError, InboundGroupSession, MegolmMessage, OutboundGroupSession, SessionKeyMessage,
};

/// Inbound sessions are addressed by room, session id and the claimed
/// sender key; all three must match for decryption to even be attempted.
type InboundKey = (String, String, Curve25519PublicKey);

#[derive(Serialize, Deserialize)]
struct PickledGroupSessions {
    outbound: HashMap<String, OutboundGroupSession>,
    inbound: Vec<InboundGroupSession>,
}

/// All group sessions this device holds: at most one outbound per room,
/// any number of inbound.
#[derive(Debug, Default)]
pub struct GroupSessionManager {
    outbound: HashMap<String, OutboundGroupSession>,
    inbound: HashMap<InboundKey, InboundGroupSession>,
    dirty: bool,
}

impl GroupSessionManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a manager pickled by [`serialize`](Self::serialize).
    pub fn restore(blob: &[u8], passphrase: &str) -> Result<Self, PickleError> {
        let plaintext = open_pickle(blob, passphrase)?;
        let pickled: PickledGroupSessions = ciborium::de::from_reader(plaintext.as_slice())
            .map_err(|_| PickleError::InvalidCredentials)?;

        let inbound = pickled
            .inbound
            .into_iter()
            .map(|session| {
                let key = (
                    session.room_id().to_string(),
                    session.session_id().to_string(),
                    session.sender_key(),
                );
                (key, session)
            })
            .collect();
        Ok(Self { outbound: pickled.outbound, inbound, dirty: false })
    }

    /// Serialize to an encrypted-at-rest blob and clear the dirty flag.
    pub fn serialize(&mut self, passphrase: &str) -> Vec<u8> {
        let pickled = PickledGroupSessions {
            outbound: self.outbound.clone(),
            inbound: self.inbound.values().cloned().collect(),
        };
        let mut plaintext = Vec::new();
        let Ok(()) = ciborium::ser::into_writer(&pickled, &mut plaintext) else {
            unreachable!("group session state serializes infallibly to a Vec");
        };
        self.dirty = false;
        seal_pickle(&plaintext, passphrase)
    }

    /// Whether unsaved mutations exist.
    pub fn needs_persistence(&self) -> bool {
        self.dirty
    }

    /// Create (or rotate to) a fresh outbound session for a room.
    ///
    /// The session is also imported as an inbound session under
    /// `own_sender_key`, so this device can decrypt its own room events.
    /// Returns the session-key export to share with the other members.
    pub fn create_outbound(
        &mut self,
        room_id: &str,
        own_sender_key: Curve25519PublicKey,
    ) -> SessionKeyMessage {
        let session = OutboundGroupSession::new(room_id);
        let export = session.export();

        tracing::debug!(room_id, session_id = session.session_id(), "created group session");
        self.outbound.insert(room_id.to_string(), session);
        self.import_session_key(own_sender_key, &export);
        self.dirty = true;
        export
    }

    /// The active outbound session for a room, if one exists.
    pub fn outbound_session(&self, room_id: &str) -> Option<&OutboundGroupSession> {
        self.outbound.get(room_id)
    }

    /// Export the room's current outbound session key, for sharing with
    /// a member who joins mid-session.
    pub fn export_session_key(
        &self,
        room_id: &str,
    ) -> Result<SessionKeyMessage, GroupSessionError> {
        self.outbound
            .get(room_id)
            .map(OutboundGroupSession::export)
            .ok_or_else(|| GroupSessionError::NoOutboundSession { room_id: room_id.to_string() })
    }

    /// Encrypt a room message on the room's outbound session.
    ///
    /// Returns the message and the session id it was encrypted under.
    pub fn encrypt(
        &mut self,
        room_id: &str,
        plaintext: &[u8],
    ) -> Result<(MegolmMessage, String), GroupSessionError> {
        let session = self
            .outbound
            .get_mut(room_id)
            .ok_or_else(|| GroupSessionError::NoOutboundSession { room_id: room_id.to_string() })?;

        let message = session.encrypt(plaintext)?;
        self.dirty = true;
        Ok((message, session.session_id().to_string()))
    }

    /// Import a shared session key, keeping the widest view.
    ///
    /// Re-importing a session already known at a lower or equal index is
    /// a no-op: the existing import decrypts a superset of what the new
    /// one would, and its replay history survives. An import at a lower
    /// index than known widens the view and replaces the entry.
    pub fn import_session_key(
        &mut self,
        sender_key: Curve25519PublicKey,
        session_key: &SessionKeyMessage,
    ) -> bool {
        let key = (session_key.room_id.clone(), session_key.session_id.clone(), sender_key);

        if let Some(existing) = self.inbound.get(&key)
            && existing.first_known_index() <= session_key.message_index
        {
            tracing::debug!(
                session_id = session_key.session_id,
                known = existing.first_known_index(),
                offered = session_key.message_index,
                "ignoring session key import with no wider view"
            );
            return false;
        }

        self.inbound.insert(key, InboundGroupSession::import(sender_key, session_key));
        self.dirty = true;
        true
    }

    /// Whether an inbound session exists for this triple.
    pub fn has_inbound_session(
        &self,
        room_id: &str,
        session_id: &str,
        sender_key: Curve25519PublicKey,
    ) -> bool {
        self.inbound
            .contains_key(&(room_id.to_string(), session_id.to_string(), sender_key))
    }

    /// Decrypt a group message.
    ///
    /// [`GroupSessionError::UnknownSession`] means the key has not
    /// arrived yet; the caller keeps the event and retries after the next
    /// [`import_session_key`](Self::import_session_key).
    pub fn decrypt(
        &mut self,
        room_id: &str,
        session_id: &str,
        sender_key: Curve25519PublicKey,
        message: &MegolmMessage,
    ) -> Result<Vec<u8>, GroupSessionError> {
        let key = (room_id.to_string(), session_id.to_string(), sender_key);
        let session =
            self.inbound.get_mut(&key).ok_or_else(|| GroupSessionError::UnknownSession {
                room_id: room_id.to_string(),
                session_id: session_id.to_string(),
            })?;

        let plaintext = session.decrypt(message)?;
        self.dirty = true;
        Ok(plaintext)
    }
}
