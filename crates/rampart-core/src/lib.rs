//! Rampart E2EE Core
//!
//! The stateful heart of client-side end-to-end encryption: the device's
//! key ring, its pairwise and group sessions, and the codec that turns
//! room events into encrypted envelopes and back.
//!
//! # Architecture
//!
//! ```text
//! RoomEvent ──► EncryptedEventCodec ──► EncryptedEnvelope
//!                      │
//!        ┌─────────────┼──────────────┐
//!        ▼             ▼              ▼
//!     KeyRing   PairwiseSessionStore  GroupSessionManager
//!   (identity,     (double-ratchet      (group-ratchet
//!    one-time       sessions per         sessions per
//!    keys)          device)              room)
//! ```
//!
//! Direct device-to-device traffic (including group session key shares)
//! goes over pairwise sessions; room traffic goes over group sessions
//! whose keys were shared that way. Every stateful type pickles to a
//! passphrase-sealed blob and reports unsaved mutations through
//! `needs_persistence`, so the embedding client decides when to write.
//!
//! All types take `&mut self` for mutation and are `Send`; wrap the codec
//! in the lock of your choice to share it.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
pub mod events;
pub mod keyring;
pub mod megolm;
pub mod olm;

pub use codec::{
    CodecError, DecryptedEvent, EncodeContext, EncryptedEventCodec, Undecryptable,
};
pub use events::{
    Algorithm, EncryptedEnvelope, EventCatalog, EventError, MEGOLM_ALGORITHM, OLM_ALGORITHM,
    RoomEvent, TypeRegistry,
};
pub use keyring::{DeviceKeys, IdentityKeys, KeyRing, MAX_ONE_TIME_KEYS, SignedOneTimeKey};
pub use megolm::{
    GroupSessionError, GroupSessionManager, InboundGroupSession, OutboundGroupSession,
    ROOM_KEY_EVENT_TYPE, SessionKeyMessage,
};
pub use olm::{OlmMessage, PairwiseSessionStore, PreKeyMessage, Session, SessionError};
