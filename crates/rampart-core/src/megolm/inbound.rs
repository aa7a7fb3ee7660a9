//! The receiver side of a group session.

use std::collections::BTreeMap;

use rampart_crypto::{Curve25519PublicKey, aead};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{GroupSessionError, MegolmMessage, SessionKeyMessage, group_associated_data};

/// A group session imported from another device (or from this device's
/// own outbound session, so its messages decrypt locally too).
///
/// Message keys derive without consuming state, so indices can arrive in
/// any order at or after [`first_known_index`](Self::first_known_index).
/// Each authenticated decrypt moves the forward-jump window past its
/// index, so a session stays decryptable however long it lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundGroupSession {
    session_id: String,
    room_id: String,
    sender_key: Curve25519PublicKey,
    ratchet: rampart_crypto::GroupRatchet,
    /// Ciphertext fingerprint per decrypted index, for replay detection
    seen: BTreeMap<u32, [u8; 32]>,
}

fn fingerprint(message: &MegolmMessage) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(message.sealed.nonce);
    hasher.update(&message.sealed.ciphertext);
    hasher.finalize().into()
}

impl InboundGroupSession {
    /// Import a session from a shared session-key message.
    pub fn import(sender_key: Curve25519PublicKey, session_key: &SessionKeyMessage) -> Self {
        Self {
            session_id: session_key.session_id.clone(),
            room_id: session_key.room_id.clone(),
            sender_key,
            ratchet: rampart_crypto::GroupRatchet::from_export(
                session_key.chain_key,
                session_key.message_index,
            ),
            seen: BTreeMap::new(),
        }
    }

    /// Session id this import belongs to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The room this session decrypts.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Identity key of the device that created the session.
    pub fn sender_key(&self) -> Curve25519PublicKey {
        self.sender_key
    }

    /// Earliest message index this import can decrypt.
    pub fn first_known_index(&self) -> u32 {
        self.ratchet.first_known_index()
    }

    /// Decrypt a group message.
    ///
    /// Decrypting the same ciphertext twice is fine (clients re-process
    /// timelines); a *different* ciphertext at an already-seen index is
    /// reported as a replay, since honest senders never reuse an index.
    pub fn decrypt(&mut self, message: &MegolmMessage) -> Result<Vec<u8>, GroupSessionError> {
        let print = fingerprint(message);
        if let Some(seen) = self.seen.get(&message.message_index)
            && *seen != print
        {
            return Err(GroupSessionError::ReplayDetected {
                message_index: message.message_index,
            });
        }

        let key = self.ratchet.key_at(message.message_index)?;
        let associated_data =
            group_associated_data(&self.session_id, message.message_index, &self.room_id);
        let plaintext = aead::open(&message.sealed, &key, &associated_data).map_err(|_| {
            GroupSessionError::DecryptionFailed { reason: "authentication failed".to_string() }
        })?;

        // Only an authenticated index may move the window
        self.ratchet.commit(message.message_index);
        self.seen.insert(message.message_index, print);
        Ok(plaintext)
    }
}
