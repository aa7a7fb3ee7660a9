//! Pairwise encrypted sessions.
//!
//! A [`Session`] wraps one double ratchet between this device and one
//! remote device, addressed by the remote's Curve25519 identity key. The
//! [`PairwiseSessionStore`] owns every session, handles establishment in
//! both directions and routes incoming messages to the session that can
//! decrypt them.
//!
//! Establishment is asymmetric. The initiator fetches one of the peer's
//! published one-time keys and sends pre-key messages until the peer
//! replies; the responder reconstructs the shared secret from the pre-key
//! header and consumes the one-time key. Consumption happens only after
//! the first message decrypts, so a garbage pre-key message cannot burn a
//! key.

mod messages;
mod session;
mod store;

use thiserror::Error;

pub use self::messages::{OlmMessage, PreKeyMessage};
pub use self::session::Session;
pub use self::store::PairwiseSessionStore;
use rampart_crypto::{KeyError, RatchetError};

/// Errors from pairwise session operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The triple-DH handshake failed
    #[error("key agreement failed: {reason}")]
    KeyAgreementFailure {
        /// Reason for the failure
        reason: String,
    },

    /// A pre-key message referenced a one-time key this device no longer
    /// holds. Either it was already consumed or it never existed; the
    /// sender must re-establish against a fresh key.
    #[error("pre-key message targets an unknown or consumed one-time key")]
    UnknownOneTimeKey,

    /// No session could decrypt the message
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason from the last session tried
        reason: String,
    },

    /// The message could not be parsed
    #[error("malformed message: {reason}")]
    MalformedMessage {
        /// Parse failure detail
        reason: String,
    },

    /// Encrypt was requested for a peer with no established session
    #[error("no established session for this device")]
    NoEstablishedSession,
}

impl SessionError {
    /// Whether re-establishing the session can clear this error.
    ///
    /// A recoverable error means the local state is fine but this message
    /// is lost to it; the caller should negotiate a fresh session.
    /// Malformed input is not recoverable by key exchange.
    pub fn is_recoverable_by_reestablishment(&self) -> bool {
        match self {
            Self::UnknownOneTimeKey | Self::DecryptionFailed { .. } | Self::NoEstablishedSession => {
                true
            }
            Self::KeyAgreementFailure { .. } | Self::MalformedMessage { .. } => false,
        }
    }
}

impl From<KeyError> for SessionError {
    fn from(err: KeyError) -> Self {
        Self::KeyAgreementFailure { reason: err.to_string() }
    }
}

impl From<RatchetError> for SessionError {
    fn from(err: RatchetError) -> Self {
        Self::DecryptionFailed { reason: err.to_string() }
    }
}
