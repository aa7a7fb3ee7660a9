//! Message sealing with XChaCha20-Poly1305.
//!
//! Callers provide the random nonce suffix so tests can run
//! deterministically. Associated data binds wire metadata (session id,
//! message index, ratchet header) that travels outside the ciphertext;
//! tampering with either the ciphertext or that metadata fails
//! authentication.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chain::MessageKey;

/// Size of the random suffix in the nonce (8 bytes)
pub const NONCE_RANDOM_SIZE: usize = 8;

/// Poly1305 tag size (16 bytes)
const POLY1305_TAG_SIZE: usize = 16;

/// Authentication failed: wrong key, tampered ciphertext or tampered
/// associated data.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("authentication failed")]
pub struct AuthenticationFailed;

/// A sealed message: nonce plus ciphertext (including the Poly1305 tag).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedMessage {
    /// The 24-byte XChaCha20 nonce
    pub nonce: [u8; 24],
    /// The ciphertext including the 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

impl SealedMessage {
    /// Plaintext length (ciphertext length minus authentication tag).
    pub fn plaintext_len(&self) -> usize {
        self.ciphertext.len().saturating_sub(POLY1305_TAG_SIZE)
    }
}

/// Seal a plaintext under a single-use message key.
///
/// # Security
///
/// - The nonce binds the message index; the random suffix keeps nonces
///   unique even across state restored from a stale pickle
/// - `associated_data` is authenticated but not encrypted
/// - Caller MUST provide cryptographically secure random bytes in
///   production
pub fn seal(
    plaintext: &[u8],
    message_key: &MessageKey,
    associated_data: &[u8],
    random_suffix: [u8; NONCE_RANDOM_SIZE],
) -> SealedMessage {
    let nonce = build_nonce(message_key.index(), random_suffix);
    let cipher = XChaCha20Poly1305::new(message_key.key().into());

    let payload = Payload { msg: plaintext, aad: associated_data };
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), payload) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    SealedMessage { nonce, ciphertext }
}

/// Open a sealed message.
///
/// # Errors
///
/// [`AuthenticationFailed`] if the key, ciphertext, nonce or associated
/// data do not match what was sealed.
pub fn open(
    sealed: &SealedMessage,
    message_key: &MessageKey,
    associated_data: &[u8],
) -> Result<Vec<u8>, AuthenticationFailed> {
    let cipher = XChaCha20Poly1305::new(message_key.key().into());
    let nonce = XNonce::from_slice(&sealed.nonce);

    let payload = Payload { msg: sealed.ciphertext.as_slice(), aad: associated_data };
    cipher.decrypt(nonce, payload).map_err(|_| AuthenticationFailed)
}

/// Build a 24-byte nonce.
///
/// Structure:
/// - bytes 0-3: message index (big-endian)
/// - bytes 4-15: zero padding
/// - bytes 16-23: random suffix (caller-provided)
fn build_nonce(index: u32, random_suffix: [u8; NONCE_RANDOM_SIZE]) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[0..4].copy_from_slice(&index.to_be_bytes());
    nonce[16..24].copy_from_slice(&random_suffix);
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainKey;

    fn test_message_key(target_index: u32) -> MessageKey {
        let mut seed = [0u8; 32];
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = i as u8;
        }

        let mut chain = ChainKey::new(seed);
        let mut key = chain.advance().unwrap();
        for _ in 1..=target_index {
            key = chain.advance().unwrap();
        }
        key
    }

    #[test]
    fn seal_open_roundtrip() {
        let key = test_message_key(0);
        let plaintext = b"Hello, World!";

        let sealed = seal(plaintext, &key, b"ad", [0xAB; NONCE_RANDOM_SIZE]);
        let opened = open(&sealed, &key, b"ad").unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn seal_open_empty_message() {
        let key = test_message_key(0);

        let sealed = seal(b"", &key, b"", [0x00; NONCE_RANDOM_SIZE]);
        let opened = open(&sealed, &key, b"").unwrap();

        assert_eq!(opened, b"");
    }

    #[test]
    fn seal_open_large_message() {
        let key = test_message_key(0);
        let plaintext = vec![0x42u8; 64 * 1024];

        let sealed = seal(&plaintext, &key, b"ad", [0xFF; NONCE_RANDOM_SIZE]);
        let opened = open(&sealed, &key, b"ad").unwrap();

        assert_eq!(opened, plaintext);
    }

    #[test]
    fn ciphertext_is_larger_than_plaintext() {
        let key = test_message_key(0);
        let plaintext = b"test message";

        let sealed = seal(plaintext, &key, b"", [0x00; NONCE_RANDOM_SIZE]);

        assert_eq!(sealed.ciphertext.len(), plaintext.len() + POLY1305_TAG_SIZE);
        assert_eq!(sealed.plaintext_len(), plaintext.len());
    }

    #[test]
    fn wrong_key_fails() {
        let key = test_message_key(0);
        let sealed = seal(b"secret", &key, b"", [0x00; NONCE_RANDOM_SIZE]);

        let mut other_seed = [0xFFu8; 32];
        other_seed[0] = 0x00;
        let wrong_key = ChainKey::new(other_seed).advance().unwrap();

        assert_eq!(open(&sealed, &wrong_key, b""), Err(AuthenticationFailed));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = test_message_key(0);
        let mut sealed = seal(b"original message", &key, b"", [0x00; NONCE_RANDOM_SIZE]);

        sealed.ciphertext[0] ^= 0xFF;

        assert_eq!(open(&sealed, &key, b""), Err(AuthenticationFailed));
    }

    #[test]
    fn tampered_nonce_fails() {
        let key = test_message_key(0);
        let mut sealed = seal(b"original message", &key, b"", [0x00; NONCE_RANDOM_SIZE]);

        sealed.nonce[20] ^= 0x01;

        assert_eq!(open(&sealed, &key, b""), Err(AuthenticationFailed));
    }

    #[test]
    fn tampered_associated_data_fails() {
        let key = test_message_key(0);
        let sealed = seal(b"message", &key, b"session-1:0", [0x00; NONCE_RANDOM_SIZE]);

        assert_eq!(open(&sealed, &key, b"session-1:1"), Err(AuthenticationFailed));
    }

    #[test]
    fn nonce_structure() {
        let key = test_message_key(3);
        let sealed = seal(b"x", &key, b"", [0xAB; NONCE_RANDOM_SIZE]);

        assert_eq!(&sealed.nonce[0..4], &3u32.to_be_bytes());
        assert_eq!(&sealed.nonce[4..16], &[0u8; 12]);
        assert_eq!(&sealed.nonce[16..24], &[0xAB; 8]);
    }

    #[test]
    fn different_random_produces_different_ciphertext() {
        let key = test_message_key(0);

        let sealed1 = seal(b"test", &key, b"", [0x00; NONCE_RANDOM_SIZE]);
        let sealed2 = seal(b"test", &key, b"", [0xFF; NONCE_RANDOM_SIZE]);

        assert_ne!(sealed1.nonce, sealed2.nonce);
        assert_ne!(sealed1.ciphertext, sealed2.ciphertext);
    }
}
