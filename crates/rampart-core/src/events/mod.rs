//! Event envelopes and the decrypted event model.
//!
//! An [`EncryptedEnvelope`] is the JSON an encrypted event arrives as: a
//! little cleartext routing metadata around an opaque ciphertext. A
//! [`RoomEvent`] is what comes out after decryption. The codec moves
//! between the two; everything here is serde plumbing plus the algorithm
//! gate that rejects ciphertexts this implementation does not speak.

mod envelope;
mod registry;

use thiserror::Error;

pub use self::envelope::{
    Algorithm, CiphertextInfo, EncryptedContent, EncryptedEnvelope, MEGOLM_ALGORITHM,
    OLM_ALGORITHM, OlmPayload, UnsignedData,
};
pub use self::registry::{EventCatalog, RoomEvent, TypeRegistry};

/// Errors from event parsing and construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event declares an encryption algorithm this implementation
    /// does not speak. The event is well-formed; it is just not ours.
    #[error("unknown encryption algorithm: {algorithm}")]
    UnknownAlgorithm {
        /// The declared algorithm
        algorithm: String,
    },

    /// The event is structurally invalid
    #[error("malformed event: {reason}")]
    MalformedEvent {
        /// Parse failure detail
        reason: String,
    },
}
