//! Group sessions for room encryption.
//!
//! A sender encrypts room messages on an [`OutboundGroupSession`] and
//! shares its ratchet state with each member over pairwise sessions as a
//! [`SessionKeyMessage`]. Each member imports that into an
//! [`InboundGroupSession`] and can decrypt everything from the shared
//! index forward, and nothing before it, which is how history visibility
//! is scoped to membership. The [`GroupSessionManager`] owns both maps.

mod inbound;
mod manager;
mod outbound;
mod session_key;

use rampart_crypto::{GroupRatchetError, SealedMessage, base64_decode, base64_encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::inbound::InboundGroupSession;
pub use self::manager::GroupSessionManager;
pub use self::outbound::OutboundGroupSession;
pub use self::session_key::{ROOM_KEY_EVENT_TYPE, SessionKeyMessage};

/// Errors from group session operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GroupSessionError {
    /// No inbound session matches this (room, session, sender) triple.
    ///
    /// Recoverable: the event stays undecryptable until the session key
    /// arrives, then a retry succeeds.
    #[error("unknown group session {session_id} in {room_id}")]
    UnknownSession {
        /// Room the event belongs to
        room_id: String,
        /// Session id the event referenced
        session_id: String,
    },

    /// The message predates this member's view of the session
    #[error("message index {requested} predates first known index {first_known_index}")]
    IndexTooOld {
        /// Earliest index the imported session can derive
        first_known_index: u32,
        /// Index the message carried
        requested: u32,
    },

    /// The message index is implausibly far past the furthest index this
    /// member has decrypted.
    ///
    /// Recoverable, and not evidence of tampering: decrypting the
    /// intervening traffic moves the window forward, after which a retry
    /// succeeds.
    #[error("message index {requested} is too far past the decryption window at {current}")]
    IndexTooFarAhead {
        /// Furthest position the decryption window has reached
        current: u32,
        /// Index the message carried
        requested: u32,
    },

    /// Authentication failed or the key could not be derived
    #[error("group decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for the failure
        reason: String,
    },

    /// A different ciphertext reused an already-seen message index
    #[error("replay detected at message index {message_index}")]
    ReplayDetected {
        /// The reused index
        message_index: u32,
    },

    /// Encrypt was requested for a room with no outbound session
    #[error("no outbound group session for {room_id}")]
    NoOutboundSession {
        /// The room
        room_id: String,
    },

    /// A session-key message could not be parsed
    #[error("malformed session key: {reason}")]
    MalformedSessionKey {
        /// Parse failure detail
        reason: String,
    },
}

impl From<GroupRatchetError> for GroupSessionError {
    fn from(err: GroupRatchetError) -> Self {
        match err {
            GroupRatchetError::IndexTooOld { first_known, requested } => {
                Self::IndexTooOld { first_known_index: first_known, requested }
            }
            GroupRatchetError::TooFarAhead { current, requested } => {
                Self::IndexTooFarAhead { current, requested }
            }
            other => Self::DecryptionFailed { reason: other.to_string() },
        }
    }
}

/// A group-encrypted message: the ratchet index plus the sealed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MegolmMessage {
    /// Index of the message key that sealed this payload
    pub message_index: u32,
    /// Sealed payload
    pub sealed: SealedMessage,
}

impl MegolmMessage {
    /// Encode for the event envelope: CBOR, then base64.
    pub fn to_base64(&self) -> String {
        let mut bytes = Vec::new();
        let Ok(()) = ciborium::ser::into_writer(self, &mut bytes) else {
            unreachable!("group messages serialize infallibly to a Vec");
        };
        base64_encode(bytes)
    }

    /// Decode from the envelope ciphertext string.
    pub fn from_base64(body: &str) -> Result<Self, GroupSessionError> {
        let bytes = base64_decode(body)
            .map_err(|e| GroupSessionError::DecryptionFailed { reason: e.to_string() })?;
        ciborium::de::from_reader(bytes.as_slice())
            .map_err(|e| GroupSessionError::DecryptionFailed { reason: e.to_string() })
    }
}

/// Associated data binding a group ciphertext to its session, index and
/// room. Swapping any of the three breaks authentication.
fn group_associated_data(session_id: &str, message_index: u32, room_id: &str) -> Vec<u8> {
    let mut data =
        Vec::with_capacity(session_id.len() + size_of::<u32>() + room_id.len());
    data.extend_from_slice(session_id.as_bytes());
    data.extend_from_slice(&message_index.to_be_bytes());
    data.extend_from_slice(room_id.as_bytes());
    data
}
