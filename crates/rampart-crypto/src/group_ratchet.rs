//! One-way group ratchet.
//!
//! A room's sender advances this ratchet once per message; receivers
//! import the chain key at some export index and can derive the message
//! key for any index at or after it by stepping forward. Earlier indices
//! are cryptographically unrecoverable; that is the point.
//!
//! Unlike the pairwise ratchet there is no skip window: forward jumps
//! re-derive without consuming state, so receivers can service indices
//! in any order at or after their import point. The jump cap is measured
//! from the furthest position a receiver has [committed](GroupRatchet::commit),
//! so it bounds the work of a single jump, not the lifetime of the
//! session.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::{ChainKey, ChainOverflow, MessageKey};

/// Maximum forward jump serviced by [`GroupRatchet::key_at`].
///
/// Bounds the work a single malicious index can cause.
pub const MAX_FORWARD_JUMP: u32 = 2000;

/// Errors from group ratchet operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GroupRatchetError {
    /// The requested index is before this ratchet's first known index.
    ///
    /// The message was sent before this receiver joined the ratchet;
    /// the ciphertext is not corrupt.
    #[error("index too old: first known {first_known}, requested {requested}")]
    IndexTooOld {
        /// Earliest index this ratchet can derive
        first_known: u32,
        /// Requested message index
        requested: u32,
    },

    /// The requested index is implausibly far ahead
    #[error("index too far ahead: at {current}, requested {requested}")]
    TooFarAhead {
        /// Current ratchet index
        current: u32,
        /// Requested message index
        requested: u32,
    },

    /// The ratchet ran out of index space
    #[error("ratchet index overflow at {current}")]
    IndexOverflow {
        /// Index at which the overflow was detected
        current: u32,
    },
}

impl From<ChainOverflow> for GroupRatchetError {
    fn from(err: ChainOverflow) -> Self {
        Self::IndexOverflow { current: err.current }
    }
}

/// A one-way group ratchet.
///
/// Outbound sessions start at index 0 from a random seed and use
/// [`advance`](Self::advance); inbound sessions are restored from an
/// exported (chain key, index) pair and use [`key_at`](Self::key_at).
#[derive(Clone, Serialize, Deserialize)]
pub struct GroupRatchet {
    chain: ChainKey,
    /// Furthest position committed by the receiver; the jump cap is
    /// measured from here, never from the import point.
    latest: ChainKey,
    first_known_index: u32,
}

impl GroupRatchet {
    /// Create a fresh ratchet from a random seed, at index 0.
    pub fn new(seed: [u8; 32]) -> Self {
        let chain = ChainKey::new(seed);
        Self { latest: chain.clone(), chain, first_known_index: 0 }
    }

    /// Restore a ratchet from an exported chain key and index.
    pub fn from_export(chain_key: [u8; 32], index: u32) -> Self {
        let chain = ChainKey::from_parts(chain_key, index);
        Self { latest: chain.clone(), chain, first_known_index: index }
    }

    /// Index of the next message key this ratchet will produce.
    pub fn index(&self) -> u32 {
        self.chain.index()
    }

    /// Earliest index this ratchet can derive a key for.
    pub fn first_known_index(&self) -> u32 {
        self.first_known_index
    }

    /// Export the current (chain key, index) pair.
    ///
    /// An importer can decrypt messages at or after the exported index,
    /// and nothing earlier.
    pub fn export(&self) -> ([u8; 32], u32) {
        (*self.chain.key(), self.chain.index())
    }

    /// Advance one step, consuming the current index (sender side).
    ///
    /// Indices are monotonically increasing and never reused.
    pub fn advance(&mut self) -> Result<MessageKey, GroupRatchetError> {
        let key = self.chain.advance()?;
        self.latest.clone_from(&self.chain);
        Ok(key)
    }

    /// Derive the message key for `index` without consuming base state
    /// (receiver side).
    ///
    /// Indices between the base and the committed position re-derive from
    /// the base with no cap: that ground has already been traversed. Only
    /// jumps past the committed position are bounded.
    ///
    /// # Errors
    ///
    /// - [`GroupRatchetError::IndexTooOld`] if `index` precedes the
    ///   base position
    /// - [`GroupRatchetError::TooFarAhead`] if the jump past the
    ///   committed position exceeds [`MAX_FORWARD_JUMP`]
    pub fn key_at(&self, index: u32) -> Result<MessageKey, GroupRatchetError> {
        let first_known = self.chain.index();
        if index < first_known {
            return Err(GroupRatchetError::IndexTooOld {
                first_known,
                requested: index,
            });
        }

        let committed = self.latest.index();
        let start = if index >= committed {
            if index - committed > MAX_FORWARD_JUMP {
                return Err(GroupRatchetError::TooFarAhead { current: committed, requested: index });
            }
            &self.latest
        } else {
            &self.chain
        };

        let mut scratch = start.clone();
        let mut key = scratch.advance()?;
        while key.index() < index {
            key = scratch.advance()?;
        }
        Ok(key)
    }

    /// Record a successfully decrypted `index`, moving the jump window
    /// past it (receiver side).
    ///
    /// Must only be called once the message at `index` has authenticated:
    /// committing an unverified index would let a forged header drag the
    /// window forward. Indices back to
    /// [`first_known_index`](Self::first_known_index) stay derivable.
    pub fn commit(&mut self, index: u32) {
        let Some(next) = index.checked_add(1) else { return };
        if next <= self.latest.index() {
            return;
        }

        let mut scratch = self.latest.clone();
        while scratch.index() < next {
            if scratch.advance().is_err() {
                return;
            }
        }
        self.latest = scratch;
    }
}

impl std::fmt::Debug for GroupRatchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GroupRatchet {{ index: {}, first_known_index: {} }}",
            self.index(),
            self.first_known_index
        )
    }
}
