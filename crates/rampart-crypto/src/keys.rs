//! Key types and text encodings.
//!
//! Curve25519 keys are used for identity, one-time and ratchet keys;
//! Ed25519 keys sign device key documents. Public keys travel as unpadded
//! base64 on the wire, so the conversions here validate length and
//! alphabet before any key ever reaches an agreement or verification
//! operation; all of these inputs are attacker-controlled.

use base64::{Engine, engine::general_purpose::STANDARD_NO_PAD};
use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

/// Length of Curve25519 and Ed25519 public keys in bytes.
pub const KEY_LENGTH: usize = 32;

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Errors from key parsing, agreement and signature verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// Input was not valid unpadded base64
    #[error("invalid base64: {reason}")]
    InvalidBase64 {
        /// Decoder error description
        reason: String,
    },

    /// Decoded input had the wrong length for this key type
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length in bytes
        expected: usize,
        /// Actual decoded length
        actual: usize,
    },

    /// Key material did not decode to a valid curve point
    #[error("invalid key material")]
    InvalidKey,

    /// Diffie-Hellman produced a non-contributory (all-zero) output
    #[error("key agreement failed: non-contributory public key")]
    KeyAgreement,

    /// Signature did not verify under the given key
    #[error("signature verification failed")]
    BadSignature,
}

/// Encode bytes as unpadded standard base64.
pub fn base64_encode(bytes: impl AsRef<[u8]>) -> String {
    STANDARD_NO_PAD.encode(bytes)
}

/// Decode unpadded standard base64.
pub fn base64_decode(input: &str) -> Result<Vec<u8>, KeyError> {
    STANDARD_NO_PAD
        .decode(input)
        .map_err(|e| KeyError::InvalidBase64 { reason: e.to_string() })
}

fn decode_fixed<const N: usize>(input: &str) -> Result<[u8; N], KeyError> {
    let bytes = base64_decode(input)?;
    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| KeyError::InvalidLength { expected: N, actual })
}

/// A Curve25519 public key.
///
/// Used as identity keys, one-time keys and ratchet keys. Hashable so it
/// can index session collections.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Curve25519PublicKey([u8; KEY_LENGTH]);

impl Curve25519PublicKey {
    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse from unpadded base64.
    pub fn from_base64(input: &str) -> Result<Self, KeyError> {
        Ok(Self(decode_fixed(input)?))
    }

    /// Unpadded base64 form, as used on the wire.
    pub fn to_base64(&self) -> String {
        base64_encode(self.0)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Display for Curve25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl std::fmt::Debug for Curve25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Curve25519PublicKey({})", self.to_base64())
    }
}

/// A Curve25519 secret key.
///
/// Debug output is redacted and the secret is zeroized on drop. The serde
/// impls exist only so pickled state can round-trip; pickles are always
/// sealed before they leave the process.
#[derive(Clone)]
pub struct Curve25519SecretKey(StaticSecret);

impl Curve25519SecretKey {
    /// Generate a fresh secret from the system RNG.
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(OsRng))
    }

    /// Restore from raw bytes (pickle path).
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Raw secret bytes, zeroized when the wrapper drops.
    pub fn to_bytes(&self) -> Zeroizing<[u8; KEY_LENGTH]> {
        Zeroizing::new(self.0.to_bytes())
    }

    /// The corresponding public key.
    pub fn public_key(&self) -> Curve25519PublicKey {
        Curve25519PublicKey(PublicKey::from(&self.0).to_bytes())
    }

    /// Diffie-Hellman with a remote public key.
    ///
    /// Rejects non-contributory results (all-zero shared point), which
    /// arise from low-order or otherwise malformed public keys.
    pub fn diffie_hellman(
        &self,
        their_key: &Curve25519PublicKey,
    ) -> Result<Zeroizing<[u8; KEY_LENGTH]>, KeyError> {
        let shared = self.0.diffie_hellman(&PublicKey::from(their_key.0));
        if !shared.was_contributory() {
            return Err(KeyError::KeyAgreement);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

impl std::fmt::Debug for Curve25519SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Curve25519SecretKey([REDACTED])")
    }
}

impl Serialize for Curve25519SecretKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Curve25519SecretKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut bytes = <[u8; KEY_LENGTH]>::deserialize(deserializer)?;
        let key = Self::from_bytes(bytes);
        bytes.zeroize();
        Ok(key)
    }
}

/// An Ed25519 public (verifying) key.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ed25519PublicKey([u8; KEY_LENGTH]);

impl Ed25519PublicKey {
    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse from unpadded base64.
    pub fn from_base64(input: &str) -> Result<Self, KeyError> {
        Ok(Self(decode_fixed(input)?))
    }

    /// Unpadded base64 form.
    pub fn to_base64(&self) -> String {
        base64_encode(self.0)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Verify a signature over `message`.
    ///
    /// Fails with [`KeyError::InvalidKey`] if the bytes are not a valid
    /// curve point and [`KeyError::BadSignature`] on verification failure.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), KeyError> {
        let key =
            ed25519_dalek::VerifyingKey::from_bytes(&self.0).map_err(|_| KeyError::InvalidKey)?;
        let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(message, &signature).map_err(|_| KeyError::BadSignature)
    }
}

impl std::fmt::Display for Ed25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl std::fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519PublicKey({})", self.to_base64())
    }
}

/// An Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Signature([u8; SIGNATURE_LENGTH]);

impl Ed25519Signature {
    /// Construct from raw bytes.
    pub fn from_bytes(bytes: [u8; SIGNATURE_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse from unpadded base64.
    pub fn from_base64(input: &str) -> Result<Self, KeyError> {
        Ok(Self(decode_fixed(input)?))
    }

    /// Unpadded base64 form, as carried in signature maps.
    pub fn to_base64(&self) -> String {
        base64_encode(self.0)
    }
}

impl std::fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519Signature({})", self.to_base64())
    }
}

/// An Ed25519 signing keypair.
///
/// One per device, created with the [`crate::keys`] generation path and
/// never rotated for the lifetime of the account.
#[derive(Clone)]
pub struct Ed25519KeyPair(ed25519_dalek::SigningKey);

impl Ed25519KeyPair {
    /// Generate a fresh keypair from the system RNG.
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }

    /// Restore from raw secret bytes (pickle path).
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// Raw secret bytes, zeroized when the wrapper drops.
    pub fn to_bytes(&self) -> Zeroizing<[u8; KEY_LENGTH]> {
        Zeroizing::new(self.0.to_bytes())
    }

    /// The verifying half.
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.0.verifying_key().to_bytes())
    }

    /// Sign a message. Deterministic for a given key and message.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.0.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for Ed25519KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ed25519KeyPair({})", self.public_key().to_base64())
    }
}

impl Serialize for Ed25519KeyPair {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_bytes().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Ed25519KeyPair {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut bytes = <[u8; KEY_LENGTH]>::deserialize(deserializer)?;
        let key = Self::from_bytes(bytes);
        bytes.zeroize();
        Ok(key)
    }
}
