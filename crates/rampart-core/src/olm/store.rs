//! The store of pairwise sessions, keyed by remote identity key.

use std::collections::HashMap;

use rampart_crypto::{Curve25519PublicKey, PickleError, open_pickle, seal_pickle};
use serde::{Deserialize, Serialize};

use super::{OlmMessage, PreKeyMessage, Session, SessionError};
use crate::keyring::KeyRing;

#[derive(Serialize, Deserialize)]
struct PickledSessionStore {
    sessions: HashMap<Curve25519PublicKey, Vec<Session>>,
}

/// All pairwise sessions this device holds.
///
/// Multiple sessions can exist per remote device (both sides may initiate
/// concurrently, and a peer that lost state re-establishes). Sessions are
/// kept in most-recently-used order per device: the session that last
/// handled a message is tried first on decryption and is the one used for
/// encryption, so both sides converge on a shared session without any
/// explicit negotiation.
#[derive(Debug, Default)]
pub struct PairwiseSessionStore {
    sessions: HashMap<Curve25519PublicKey, Vec<Session>>,
    dirty: bool,
}

impl PairwiseSessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a store pickled by [`serialize`](Self::serialize).
    pub fn restore(blob: &[u8], passphrase: &str) -> Result<Self, PickleError> {
        let plaintext = open_pickle(blob, passphrase)?;
        let pickled: PickledSessionStore = ciborium::de::from_reader(plaintext.as_slice())
            .map_err(|_| PickleError::InvalidCredentials)?;
        Ok(Self { sessions: pickled.sessions, dirty: false })
    }

    /// Serialize to an encrypted-at-rest blob and clear the dirty flag.
    pub fn serialize(&mut self, passphrase: &str) -> Vec<u8> {
        let pickled = PickledSessionStore { sessions: self.sessions.clone() };
        let mut plaintext = Vec::new();
        let Ok(()) = ciborium::ser::into_writer(&pickled, &mut plaintext) else {
            unreachable!("session state serializes infallibly to a Vec");
        };
        self.dirty = false;
        seal_pickle(&plaintext, passphrase)
    }

    /// Whether unsaved mutations exist.
    pub fn needs_persistence(&self) -> bool {
        self.dirty
    }

    /// Number of sessions held for a remote device.
    pub fn session_count(&self, their_identity: &Curve25519PublicKey) -> usize {
        self.sessions.get(their_identity).map_or(0, Vec::len)
    }

    /// Initiate a new session against one of the peer's published
    /// one-time keys and make it the active session for that device.
    ///
    /// Returns the new session's id.
    pub fn create_outbound(
        &mut self,
        keyring: &KeyRing,
        their_identity: Curve25519PublicKey,
        their_one_time: Curve25519PublicKey,
    ) -> Result<String, SessionError> {
        let session =
            Session::new_outbound(keyring.identity_secret(), their_identity, their_one_time)?;
        let session_id = session.session_id().to_string();

        tracing::debug!(device = %their_identity, session_id, "established outbound session");
        self.sessions.entry(their_identity).or_default().insert(0, session);
        self.dirty = true;
        Ok(session_id)
    }

    /// Encrypt for a remote device on its active session.
    pub fn encrypt(
        &mut self,
        their_identity: &Curve25519PublicKey,
        plaintext: &[u8],
    ) -> Result<OlmMessage, SessionError> {
        let session = self
            .sessions
            .get_mut(their_identity)
            .and_then(|sessions| sessions.first_mut())
            .ok_or(SessionError::NoEstablishedSession)?;

        let message = session.encrypt(plaintext)?;
        self.dirty = true;
        Ok(message)
    }

    /// Answer a pre-key message from a known device, checking that the
    /// handshake header actually claims that device's identity.
    ///
    /// Returns the new session's id together with the decrypted first
    /// plaintext. The targeted one-time key is consumed from the ring
    /// only after that first plaintext comes out, so a forged handshake
    /// cannot burn keys.
    pub fn create_inbound_from(
        &mut self,
        keyring: &mut KeyRing,
        their_identity: Curve25519PublicKey,
        prekey: &PreKeyMessage,
    ) -> Result<(String, Vec<u8>), SessionError> {
        if prekey.identity_key != their_identity {
            return Err(SessionError::MalformedMessage {
                reason: "pre-key message claims a different identity".to_string(),
            });
        }
        self.create_inbound(keyring, prekey)
    }

    /// Answer a pre-key message, trusting the identity key it carries.
    ///
    /// See [`create_inbound_from`](Self::create_inbound_from) when the
    /// sender's identity is already known.
    pub fn create_inbound(
        &mut self,
        keyring: &mut KeyRing,
        prekey: &PreKeyMessage,
    ) -> Result<(String, Vec<u8>), SessionError> {
        let one_time_secret = keyring
            .one_time_secret(&prekey.one_time_key)
            .ok_or(SessionError::UnknownOneTimeKey)?;
        let (session, plaintext) =
            Session::new_inbound(keyring.identity_secret(), one_time_secret, prekey)?;

        keyring.mark_consumed(&prekey.one_time_key);
        let session_id = session.session_id().to_string();
        tracing::debug!(
            device = %prekey.identity_key,
            session_id,
            "established inbound session"
        );
        self.sessions.entry(prekey.identity_key).or_default().insert(0, session);
        self.dirty = true;
        Ok((session_id, plaintext))
    }

    /// Decrypt a message from a remote device.
    ///
    /// Existing sessions for `sender_key` are tried most-recent-first;
    /// the session that decrypts is promoted to active. A pre-key message
    /// that no session accepts establishes a new inbound session via
    /// [`create_inbound_from`](Self::create_inbound_from).
    pub fn decrypt(
        &mut self,
        keyring: &mut KeyRing,
        sender_key: Curve25519PublicKey,
        message: &OlmMessage,
    ) -> Result<Vec<u8>, SessionError> {
        let mut last_failure: Option<SessionError> = None;

        if let Some(sessions) = self.sessions.get_mut(&sender_key) {
            for index in 0..sessions.len() {
                match sessions[index].decrypt(message) {
                    Ok(plaintext) => {
                        if index > 0 {
                            let session = sessions.remove(index);
                            sessions.insert(0, session);
                        }
                        self.dirty = true;
                        return Ok(plaintext);
                    }
                    // A failed attempt never advances that session's state
                    Err(err) => last_failure = Some(err),
                }
            }
        }

        let OlmMessage::PreKey(prekey) = message else {
            return Err(last_failure.unwrap_or(SessionError::NoEstablishedSession));
        };
        let (_, plaintext) = self.create_inbound_from(keyring, sender_key, prekey)?;
        Ok(plaintext)
    }
}
