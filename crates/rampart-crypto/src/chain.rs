//! Symmetric key chain shared by the pairwise and group ratchets.
//!
//! A chain key produces a sequence of single-use message keys. Each
//! advance derives the message key and the next chain key with distinct
//! HMAC labels, then overwrites the old chain key.
//!
//! # Security Properties
//!
//! - Forward Secrecy: Old chain keys are overwritten when advancing
//! - Key Uniqueness: Each index produces a unique message key
//! - Determinism: Same seed always produces same key sequence

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

type HmacSha256 = Hmac<Sha256>;

/// Label for deriving the next chain key
const CHAIN_LABEL: &[u8] = b"chain";

/// Label for deriving a message key
const MESSAGE_LABEL: &[u8] = b"message";

/// The chain index would wrap; the chain is exhausted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("chain index overflow at {current}")]
pub struct ChainOverflow {
    /// Index at which the overflow was detected
    pub current: u32,
}

/// A message key derived from a chain.
///
/// Used for a single AEAD operation and discarded; the key bytes are
/// zeroized on drop.
#[derive(Clone, Serialize, Deserialize)]
pub struct MessageKey {
    key: [u8; 32],
    index: u32,
}

impl MessageKey {
    /// 32-byte symmetric key for XChaCha20-Poly1305.
    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Chain index this key was derived at.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for MessageKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MessageKey {{ index: {}, key: [REDACTED] }}", self.index)
    }
}

/// A forward-secure chain key.
///
/// Each [`advance()`](Self::advance) call:
/// 1. Derives a message key from the current chain key
/// 2. Derives the next chain key
/// 3. Overwrites the old chain key (forward secrecy)
#[derive(Clone, Serialize, Deserialize)]
pub struct ChainKey {
    key: [u8; 32],
    index: u32,
}

impl ChainKey {
    /// Create a chain from a seed, starting at index 0.
    pub fn new(seed: [u8; 32]) -> Self {
        Self { key: seed, index: 0 }
    }

    /// Restore a chain at a specific index (import/pickle path).
    pub fn from_parts(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    /// Index of the next message key this chain will produce.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Raw chain key bytes, for session-key export.
    pub(crate) fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// Advance the chain and return the message key for the current
    /// index.
    pub fn advance(&mut self) -> Result<MessageKey, ChainOverflow> {
        if self.index == u32::MAX {
            return Err(ChainOverflow { current: self.index });
        }

        let message_key = self.derive(MESSAGE_LABEL);
        let mut next = self.derive(CHAIN_LABEL);

        self.key.zeroize();
        self.key = next;
        next.zeroize();

        let index = self.index;
        self.index = self.index.wrapping_add(1);

        Ok(MessageKey { key: message_key, index })
    }

    fn derive(&self, label: &[u8]) -> [u8; 32] {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(label);
        let result = mac.finalize().into_bytes();

        let mut out = [0u8; 32];
        out.copy_from_slice(&result);
        out
    }
}

impl Drop for ChainKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl std::fmt::Debug for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChainKey {{ index: {}, key: [REDACTED] }}", self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_seed() -> [u8; 32] {
        let mut seed = [0u8; 32];
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = i as u8;
        }
        seed
    }

    #[test]
    fn new_chain_starts_at_index_zero() {
        let chain = ChainKey::new(test_seed());
        assert_eq!(chain.index(), 0);
    }

    #[test]
    fn advance_increments_index() {
        let mut chain = ChainKey::new(test_seed());

        let key0 = chain.advance().unwrap();
        assert_eq!(key0.index(), 0);
        assert_eq!(chain.index(), 1);

        let key1 = chain.advance().unwrap();
        assert_eq!(key1.index(), 1);
        assert_eq!(chain.index(), 2);
    }

    #[test]
    fn advance_produces_unique_keys() {
        let mut chain = ChainKey::new(test_seed());

        let key0 = chain.advance().unwrap();
        let key1 = chain.advance().unwrap();
        let key2 = chain.advance().unwrap();

        assert_ne!(key0.key(), key1.key(), "keys must be unique");
        assert_ne!(key1.key(), key2.key(), "keys must be unique");
        assert_ne!(key0.key(), key2.key(), "keys must be unique");
    }

    #[test]
    fn chain_is_deterministic() {
        let mut chain1 = ChainKey::new(test_seed());
        let mut chain2 = ChainKey::new(test_seed());

        for _ in 0..10 {
            let key1 = chain1.advance().unwrap();
            let key2 = chain2.advance().unwrap();
            assert_eq!(key1.key(), key2.key(), "same seed must produce same keys");
            assert_eq!(key1.index(), key2.index());
        }
    }

    #[test]
    fn different_seeds_produce_different_keys() {
        let mut seed1 = [0u8; 32];
        let mut seed2 = [0u8; 32];
        seed1[0] = 1;
        seed2[0] = 2;

        let key1 = ChainKey::new(seed1).advance().unwrap();
        let key2 = ChainKey::new(seed2).advance().unwrap();

        assert_ne!(key1.key(), key2.key());
    }

    #[test]
    fn from_parts_restores_position() {
        let mut chain = ChainKey::new(test_seed());
        for _ in 0..5 {
            chain.advance().unwrap();
        }

        let mut restored = ChainKey::from_parts(*chain.key(), chain.index());
        let original = chain.advance().unwrap();
        let replayed = restored.advance().unwrap();

        assert_eq!(original.key(), replayed.key());
        assert_eq!(original.index(), replayed.index());
    }

    #[test]
    fn overflow_is_rejected() {
        let mut chain = ChainKey::from_parts(test_seed(), u32::MAX);
        let result = chain.advance();
        assert_eq!(result.unwrap_err(), ChainOverflow { current: u32::MAX });
    }

    #[test]
    fn debug_output_redacts_key_material() {
        let chain = ChainKey::new(test_seed());
        assert!(format!("{chain:?}").contains("REDACTED"));

        let key = ChainKey::new(test_seed()).advance().unwrap();
        assert!(format!("{key:?}").contains("REDACTED"));
    }
}
