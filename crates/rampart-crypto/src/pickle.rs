//! Encrypted-at-rest serialization ("pickling").
//!
//! A pickle is an opaque blob sealing serialized key or session state
//! under a caller-supplied passphrase. The format is a private contract
//! between [`seal_pickle`] and [`open_pickle`] of the same version; the
//! version byte exists so a future format can be told apart, not to
//! promise cross-version compatibility.
//!
//! Layout: `magic(4) || version(1) || salt(16) || nonce(24) || ciphertext`.
//! The passphrase is stretched with HKDF-SHA256 over a random salt; the
//! payload is sealed with XChaCha20-Poly1305, with magic and version as
//! associated data so a header swap fails authentication.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

/// Format magic
const MAGIC: &[u8; 4] = b"RPKL";

/// Current pickle format version
const VERSION: u8 = 1;

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 24;
const HEADER_SIZE: usize = 4 + 1 + SALT_SIZE + NONCE_SIZE;

/// Label for stretching the passphrase into an AEAD key
const PICKLE_INFO: &[u8] = b"rampartPickleV1";

/// Errors from opening a pickle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PickleError {
    /// Wrong passphrase, or the blob is corrupt or truncated
    #[error("invalid credentials: wrong passphrase or corrupt pickle")]
    InvalidCredentials,

    /// The blob is a pickle, but of a version this build does not read
    #[error("unsupported pickle version: {found}")]
    UnsupportedFormat {
        /// Version byte found in the blob
        found: u8,
    },
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Zeroizing<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), passphrase.as_bytes());
    let mut key = Zeroizing::new([0u8; 32]);
    let Ok(()) = hkdf.expand(PICKLE_INFO, key.as_mut()) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    key
}

/// Seal `plaintext` under `passphrase`.
///
/// Guaranteed to round-trip through [`open_pickle`] with the same
/// passphrase. Salt and nonce are drawn from the system RNG.
pub fn seal_pickle(plaintext: &[u8], passphrase: &str) -> Vec<u8> {
    let mut salt = [0u8; SALT_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt);
    let cipher = XChaCha20Poly1305::new(key.as_ref().into());

    let aad = [MAGIC.as_slice(), &[VERSION]].concat();
    let payload = Payload { msg: plaintext, aad: &aad };
    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), payload) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut blob = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    blob.extend_from_slice(MAGIC);
    blob.push(VERSION);
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    blob
}

/// Open a pickle sealed by [`seal_pickle`].
///
/// # Errors
///
/// - [`PickleError::InvalidCredentials`] on a wrong passphrase or a
///   corrupt/truncated blob
/// - [`PickleError::UnsupportedFormat`] if the version byte is not ours
pub fn open_pickle(blob: &[u8], passphrase: &str) -> Result<Vec<u8>, PickleError> {
    if blob.len() < HEADER_SIZE || &blob[0..4] != MAGIC {
        return Err(PickleError::InvalidCredentials);
    }
    let version = blob[4];
    if version != VERSION {
        return Err(PickleError::UnsupportedFormat { found: version });
    }

    let salt = &blob[5..5 + SALT_SIZE];
    let nonce = &blob[5 + SALT_SIZE..HEADER_SIZE];
    let ciphertext = &blob[HEADER_SIZE..];

    let key = derive_key(passphrase, salt);
    let cipher = XChaCha20Poly1305::new(key.as_ref().into());

    let aad = [MAGIC.as_slice(), &[VERSION]].concat();
    let payload = Payload { msg: ciphertext, aad: &aad };
    cipher
        .decrypt(XNonce::from_slice(nonce), payload)
        .map_err(|_| PickleError::InvalidCredentials)
}
