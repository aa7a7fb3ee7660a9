//! The boundary between plaintext room events and encrypted envelopes.
//!
//! [`EncryptedEventCodec`] owns the device's key ring, its pairwise
//! sessions and its group sessions, and exposes the two operations the
//! rest of a client needs: encode a [`RoomEvent`] into an
//! [`EncryptedEnvelope`], and decode an envelope back into an event. A
//! failed decode hands the envelope back untouched, so the caller can
//! hold the event and retry once the missing session key arrives.
//!
//! Session keys shared as `m.room_key` events are imported automatically
//! when they decrypt over a pairwise session.

use rampart_crypto::Curve25519PublicKey;
use serde_json::{Value, json};
use thiserror::Error;

use crate::events::{
    Algorithm, CiphertextInfo, EncryptedContent, EncryptedEnvelope, EventCatalog, EventError,
    OlmPayload, RoomEvent,
};
use crate::keyring::KeyRing;
use crate::megolm::{
    GroupSessionError, GroupSessionManager, MegolmMessage, ROOM_KEY_EVENT_TYPE, SessionKeyMessage,
};
use crate::olm::{OlmMessage, PairwiseSessionStore, SessionError};

/// Errors from encoding or decoding encrypted events.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A pairwise session operation failed
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A group session operation failed
    #[error(transparent)]
    Group(#[from] GroupSessionError),

    /// The event or payload was structurally invalid
    #[error(transparent)]
    Event(#[from] EventError),

    /// The event was not addressed to this device
    #[error("no ciphertext addressed to this device")]
    NotForThisDevice,

    /// The decrypted payload's room does not match the envelope's.
    ///
    /// A homeserver forwarding a ciphertext into a different room would
    /// present exactly this.
    #[error("payload room {payload} does not match envelope room {envelope}")]
    RoomMismatch {
        /// Room id inside the authenticated payload
        payload: String,
        /// Room id the envelope claims
        envelope: String,
    },
}

/// Where an encoded event is headed.
#[derive(Debug, Clone, Copy)]
pub enum EncodeContext<'a> {
    /// Device to device, over pairwise sessions
    Direct {
        /// Identity keys of the recipient devices
        recipients: &'a [Curve25519PublicKey],
    },
    /// Into a room, over its group session
    Group {
        /// The room
        room_id: &'a str,
    },
}

/// A successfully decoded event, with its envelope for provenance.
#[derive(Debug, Clone)]
pub struct DecryptedEvent {
    /// The decrypted room event, metadata merged from the envelope
    pub event: RoomEvent,
    /// The envelope it arrived in
    pub envelope: EncryptedEnvelope,
}

/// An envelope that could not be decoded, with the reason.
///
/// The envelope is returned intact: when
/// [`is_retriable`](Self::is_retriable) holds, importing the missing
/// session key and decoding again will succeed.
#[derive(Debug, Clone)]
pub struct Undecryptable {
    /// The envelope, unchanged
    pub envelope: EncryptedEnvelope,
    /// Why decoding failed
    pub reason: CodecError,
}

impl Undecryptable {
    /// Whether a later key arrival can make this envelope decodable.
    pub fn is_retriable(&self) -> bool {
        match &self.reason {
            CodecError::Session(err) => err.is_recoverable_by_reestablishment(),
            CodecError::Group(err) => {
                // A window too far behind catches up as the intervening
                // traffic decrypts
                matches!(
                    err,
                    GroupSessionError::UnknownSession { .. }
                        | GroupSessionError::IndexTooFarAhead { .. }
                )
            }
            CodecError::Event(_) | CodecError::NotForThisDevice | CodecError::RoomMismatch { .. } => {
                false
            }
        }
    }
}

/// The encryption boundary for one device.
#[derive(Debug)]
pub struct EncryptedEventCodec<C> {
    keyring: KeyRing,
    sessions: PairwiseSessionStore,
    groups: GroupSessionManager,
    catalog: C,
}

impl<C: EventCatalog> EncryptedEventCodec<C> {
    /// Build a codec around a key ring, with no sessions yet.
    pub fn new(keyring: KeyRing, catalog: C) -> Self {
        Self {
            keyring,
            sessions: PairwiseSessionStore::new(),
            groups: GroupSessionManager::new(),
            catalog,
        }
    }

    /// Rebuild a codec from restored state.
    pub fn from_parts(
        keyring: KeyRing,
        sessions: PairwiseSessionStore,
        groups: GroupSessionManager,
        catalog: C,
    ) -> Self {
        Self { keyring, sessions, groups, catalog }
    }

    /// The device's key ring.
    pub fn keyring(&self) -> &KeyRing {
        &self.keyring
    }

    /// Mutable access to the key ring, for key upload bookkeeping.
    pub fn keyring_mut(&mut self) -> &mut KeyRing {
        &mut self.keyring
    }

    /// The pairwise session store.
    pub fn sessions(&self) -> &PairwiseSessionStore {
        &self.sessions
    }

    /// The group session manager.
    pub fn groups(&self) -> &GroupSessionManager {
        &self.groups
    }

    /// Whether any owned state has unsaved mutations.
    pub fn needs_persistence(&self) -> bool {
        self.keyring.needs_persistence()
            || self.sessions.needs_persistence()
            || self.groups.needs_persistence()
    }

    /// Take the codec apart for persistence.
    pub fn into_parts(self) -> (KeyRing, PairwiseSessionStore, GroupSessionManager, C) {
        (self.keyring, self.sessions, self.groups, self.catalog)
    }

    /// Establish a pairwise session toward a device, given one of its
    /// published one-time keys.
    pub fn establish_session(
        &mut self,
        their_identity: Curve25519PublicKey,
        their_one_time: Curve25519PublicKey,
    ) -> Result<String, CodecError> {
        Ok(self.sessions.create_outbound(&self.keyring, their_identity, their_one_time)?)
    }

    /// Create (or rotate) the group session for a room.
    ///
    /// Returns the session-key message to share with each member over
    /// their pairwise session, typically via
    /// [`encode`](Self::encode) of an `m.room_key` event.
    pub fn create_group_session(&mut self, room_id: &str) -> SessionKeyMessage {
        let own_key = self.keyring.identity_keys().curve25519;
        self.groups.create_outbound(room_id, own_key)
    }

    /// Import a shared group session key directly.
    pub fn import_session_key(
        &mut self,
        sender_key: Curve25519PublicKey,
        session_key: &SessionKeyMessage,
    ) -> bool {
        self.groups.import_session_key(sender_key, session_key)
    }

    /// Encrypt a room event for its destination.
    ///
    /// Any `m.relates_to` in the event content is lifted out and carried
    /// in cleartext, so servers can aggregate relations without reading
    /// the payload; the rest of the content is encrypted.
    pub fn encode(
        &mut self,
        event: &RoomEvent,
        context: EncodeContext<'_>,
    ) -> Result<EncryptedEnvelope, CodecError> {
        let mut payload = self.catalog.serialize(event);
        let relates_to = payload
            .get_mut("content")
            .and_then(Value::as_object_mut)
            .and_then(|map| map.remove("m.relates_to"));

        let sender_key = self.keyring.identity_keys().curve25519;
        let encrypted = match context {
            EncodeContext::Direct { recipients } => {
                let bytes = payload.to_string().into_bytes();

                let mut ciphertexts = std::collections::BTreeMap::new();
                for recipient in recipients {
                    let message = self.sessions.encrypt(recipient, &bytes)?;
                    let (message_type, body) = message.to_parts();
                    ciphertexts.insert(recipient.to_base64(), OlmPayload { message_type, body });
                }

                EncryptedContent {
                    algorithm: Algorithm::Olm.as_str().to_string(),
                    ciphertext: CiphertextInfo::Olm(ciphertexts),
                    sender_key: sender_key.to_base64(),
                    device_id: None,
                    session_id: None,
                    relates_to,
                }
            }
            EncodeContext::Group { room_id } => {
                // The room id rides inside the authenticated payload, so
                // a forwarded ciphertext cannot change rooms unnoticed
                if let Value::Object(map) = &mut payload {
                    map.insert("room_id".to_string(), json!(room_id));
                }
                let (message, session_id) =
                    self.groups.encrypt(room_id, payload.to_string().as_bytes())?;

                EncryptedContent {
                    algorithm: Algorithm::Megolm.as_str().to_string(),
                    ciphertext: CiphertextInfo::Megolm(message.to_base64()),
                    sender_key: sender_key.to_base64(),
                    device_id: Some(self.keyring.device_id().to_string()),
                    session_id: Some(session_id),
                    relates_to,
                }
            }
        };

        Ok(EncryptedEnvelope {
            event_id: None,
            sender: Some(self.keyring.user_id().to_string()),
            origin_server_ts: None,
            room_id: match context {
                EncodeContext::Group { room_id } => Some(room_id.to_string()),
                EncodeContext::Direct { .. } => None,
            },
            content: encrypted,
            unsigned: None,
        })
    }

    /// Decrypt an envelope back into a room event.
    ///
    /// On failure the envelope comes back inside [`Undecryptable`]; a
    /// retriable failure means the same envelope will decode once the
    /// missing session key has been imported. Failed attempts never
    /// advance any session state.
    pub fn decode(&mut self, envelope: EncryptedEnvelope) -> Result<DecryptedEvent, Undecryptable> {
        match self.decode_inner(&envelope) {
            Ok(event) => Ok(DecryptedEvent { event, envelope }),
            Err(reason) => {
                tracing::warn!(
                    event_id = envelope.event_id.as_deref().unwrap_or("<none>"),
                    %reason,
                    "event undecryptable"
                );
                Err(Undecryptable { envelope, reason })
            }
        }
    }

    fn decode_inner(&mut self, envelope: &EncryptedEnvelope) -> Result<RoomEvent, CodecError> {
        let sender_key = Curve25519PublicKey::from_base64(&envelope.content.sender_key)
            .map_err(|e| EventError::MalformedEvent { reason: e.to_string() })?;

        let payload = match envelope.algorithm()? {
            Algorithm::Olm => self.decrypt_pairwise(envelope, sender_key)?,
            Algorithm::Megolm => self.decrypt_group(envelope, sender_key)?,
        };

        let mut event = self.catalog.construct(&payload)?;

        // A decrypted room-key share becomes an inbound session right away
        if event.event_type == ROOM_KEY_EVENT_TYPE
            && let Ok(session_key) = SessionKeyMessage::from_event_content(&event.content)
        {
            self.groups.import_session_key(sender_key, &session_key);
        }

        // Routing metadata lives on the envelope, not in the ciphertext
        event.event_id.clone_from(&envelope.event_id);
        event.sender.clone_from(&envelope.sender);
        event.origin_server_ts = envelope.origin_server_ts;
        if let Some(relates_to) = &envelope.content.relates_to
            && let Value::Object(map) = &mut event.content
        {
            map.insert("m.relates_to".to_string(), relates_to.clone());
        }
        if let Some(redacts) = envelope.unsigned.as_ref().and_then(|u| u.redacts.as_deref()) {
            let unsigned = event.unsigned.get_or_insert_with(|| json!({}));
            if let Value::Object(map) = unsigned {
                map.insert("redacts".to_string(), json!(redacts));
            }
        }

        Ok(event)
    }

    fn decrypt_pairwise(
        &mut self,
        envelope: &EncryptedEnvelope,
        sender_key: Curve25519PublicKey,
    ) -> Result<Value, CodecError> {
        let CiphertextInfo::Olm(payloads) = &envelope.content.ciphertext else {
            return Err(EventError::MalformedEvent {
                reason: "pairwise event without per-recipient ciphertext".to_string(),
            }
            .into());
        };

        let own_key = self.keyring.identity_keys().curve25519.to_base64();
        let payload = payloads.get(&own_key).ok_or(CodecError::NotForThisDevice)?;

        let message = OlmMessage::from_parts(payload.message_type, &payload.body)?;
        let plaintext = self.sessions.decrypt(&mut self.keyring, sender_key, &message)?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| EventError::MalformedEvent { reason: e.to_string() }.into())
    }

    fn decrypt_group(
        &mut self,
        envelope: &EncryptedEnvelope,
        sender_key: Curve25519PublicKey,
    ) -> Result<Value, CodecError> {
        let CiphertextInfo::Megolm(body) = &envelope.content.ciphertext else {
            return Err(EventError::MalformedEvent {
                reason: "group event without a shared ciphertext".to_string(),
            }
            .into());
        };
        let missing = |field: &str| EventError::MalformedEvent {
            reason: format!("group event missing {field}"),
        };
        let session_id = envelope.content.session_id.as_deref().ok_or_else(|| missing("session_id"))?;
        let room_id = envelope.room_id.as_deref().ok_or_else(|| missing("room_id"))?;

        let message = MegolmMessage::from_base64(body)?;
        let plaintext = self.groups.decrypt(room_id, session_id, sender_key, &message)?;

        let payload: Value = serde_json::from_slice(&plaintext)
            .map_err(|e| EventError::MalformedEvent { reason: e.to_string() })?;

        let payload_room = payload.get("room_id").and_then(Value::as_str).unwrap_or_default();
        if payload_room != room_id {
            return Err(CodecError::RoomMismatch {
                payload: payload_room.to_string(),
                envelope: room_id.to_string(),
            });
        }
        Ok(payload)
    }
}
