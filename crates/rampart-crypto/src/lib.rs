//! Rampart Cryptographic Primitives
//!
//! Cryptographic building blocks for the Rampart E2EE core: key types,
//! triple-DH session agreement, the pairwise double ratchet, the one-way
//! group ratchet, AEAD message sealing and passphrase pickling. Nothing
//! here does I/O; the stateful account and session layers live in
//! `rampart-core`.
//!
//! # Key Lifecycle
//!
//! Pairwise sessions derive their root from a triple Diffie-Hellman over
//! the device identity key, a fresh ephemeral key and one of the peer's
//! published one-time keys; the double ratchet then produces one message
//! key per message. Group sessions derive message keys from a one-way
//! chain whose (key, index) pair is exported to room members over those
//! pairwise sessions.
//!
//! ```text
//! Triple-DH shared secret          Random group seed
//!        │                                │
//!        ▼                                ▼
//! Double Ratchet ─► Message Keys   Group Ratchet ─► Message Keys
//!        │                                │
//!        ▼                                ▼
//!     XChaCha20-Poly1305 AEAD ─► Ciphertext
//! ```
//!
//! # Security
//!
//! - Message keys are single-use; chain keys are zeroized on advance
//! - A failed pairwise decryption never advances ratchet state
//! - Group ratchets cannot derive keys before their first known index
//! - Pickles authenticate their own header; a wrong passphrase and a
//!   corrupt blob are indistinguishable by design

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod agreement;
pub mod chain;
pub mod double_ratchet;
pub mod group_ratchet;
pub mod keys;
pub mod pickle;

pub use aead::{AuthenticationFailed, NONCE_RANDOM_SIZE, SealedMessage, open, seal};
pub use agreement::{SharedSecret, triple_dh_inbound, triple_dh_outbound};
pub use chain::{ChainKey, ChainOverflow, MessageKey};
pub use double_ratchet::{
    DoubleRatchet, MAX_SKIP, RatchetError, RatchetHeader, RatchetMessage,
};
pub use group_ratchet::{GroupRatchet, GroupRatchetError, MAX_FORWARD_JUMP};
pub use keys::{
    Curve25519PublicKey, Curve25519SecretKey, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature,
    KeyError, base64_decode, base64_encode,
};
pub use pickle::{PickleError, open_pickle, seal_pickle};
