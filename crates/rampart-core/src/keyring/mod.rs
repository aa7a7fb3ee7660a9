//! Device identity and one-time-key lifecycle.
//!
//! A [`KeyRing`] owns the device's long-term Ed25519 signing pair, its
//! Curve25519 identity pair and the bounded pool of one-time prekeys.
//! It is obtained exactly two ways, [`KeyRing::new`] for a fresh device
//! or [`KeyRing::restore`] from a pickle, and the identity material is
//! never regenerated for the lifetime of the account.
//!
//! The ring never persists itself. Every mutating operation raises the
//! dirty flag ([`KeyRing::needs_persistence`]); the owner schedules a
//! [`KeyRing::serialize`] whenever it sees the flag. If the process dies
//! between a mutation and the save, the restored state is stale relative
//! to what was sent on the wire; the consumption paths below are
//! idempotent so that degrades to a recoverable error instead of silent
//! corruption.

mod one_time_keys;
mod signing;

use std::collections::BTreeMap;

use rampart_crypto::{
    Curve25519PublicKey, Curve25519SecretKey, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature,
    PickleError, open_pickle, seal_pickle,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use self::signing::{DeviceKeys, canonical_json, verify_identity_signature, verify_signed_json};
use self::one_time_keys::OneTimeKeyPool;
use crate::events::{MEGOLM_ALGORITHM, OLM_ALGORITHM};

/// Upper bound on unconsumed one-time keys held at once.
pub const MAX_ONE_TIME_KEYS: usize = 100;

/// Key-upload algorithm identifier for signed one-time keys.
pub const SIGNED_CURVE25519: &str = "signed_curve25519";

/// The device's public identity keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityKeys {
    /// Curve25519 identity key (the "sender key" on the wire)
    pub curve25519: Curve25519PublicKey,
    /// Ed25519 fingerprint key
    pub ed25519: Ed25519PublicKey,
}

/// A one-time key ready for upload: the key plus its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOneTimeKey {
    /// Unpadded base64 Curve25519 public key
    pub key: String,
    /// Signatures, keyed by user id then `ed25519:<device_id>`
    pub signatures: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize)]
struct PickledKeyRing {
    user_id: String,
    device_id: String,
    signing_key: Ed25519KeyPair,
    identity_key: Curve25519SecretKey,
    one_time_keys: OneTimeKeyPool,
}

/// The device's cryptographic identity.
pub struct KeyRing {
    user_id: String,
    device_id: String,
    signing_key: Ed25519KeyPair,
    identity_key: Curve25519SecretKey,
    one_time_keys: OneTimeKeyPool,
    dirty: bool,
}

impl KeyRing {
    /// Create a fresh ring, generating both long-term key pairs.
    ///
    /// This happens once per device lifetime; replacing the identity
    /// means replacing the whole account.
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        let ring = Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            signing_key: Ed25519KeyPair::generate(),
            identity_key: Curve25519SecretKey::generate(),
            one_time_keys: OneTimeKeyPool::default(),
            dirty: true,
        };
        tracing::debug!(user_id = %ring.user_id, device_id = %ring.device_id, "created key ring");
        ring
    }

    /// Restore a ring pickled by [`serialize`](Self::serialize).
    ///
    /// Fails with [`PickleError::InvalidCredentials`] on a wrong
    /// passphrase or a corrupt blob.
    pub fn restore(blob: &[u8], passphrase: &str) -> Result<Self, PickleError> {
        let plaintext = open_pickle(blob, passphrase)?;
        let pickled: PickledKeyRing = ciborium::de::from_reader(plaintext.as_slice())
            .map_err(|_| PickleError::InvalidCredentials)?;

        Ok(Self {
            user_id: pickled.user_id,
            device_id: pickled.device_id,
            signing_key: pickled.signing_key,
            identity_key: pickled.identity_key,
            one_time_keys: pickled.one_time_keys,
            dirty: false,
        })
    }

    /// Serialize to an encrypted-at-rest blob and clear the dirty flag.
    ///
    /// Round-trips through [`restore`](Self::restore) under the same
    /// passphrase.
    pub fn serialize(&mut self, passphrase: &str) -> Vec<u8> {
        let pickled = PickledKeyRing {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            signing_key: self.signing_key.clone(),
            identity_key: self.identity_key.clone(),
            one_time_keys: self.one_time_keys.clone(),
        };

        let mut plaintext = Vec::new();
        let Ok(()) = ciborium::ser::into_writer(&pickled, &mut plaintext) else {
            unreachable!("key ring state serializes infallibly to a Vec");
        };

        self.dirty = false;
        seal_pickle(&plaintext, passphrase)
    }

    /// Owning user id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Device id.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The public identity keys. Read-only.
    pub fn identity_keys(&self) -> IdentityKeys {
        IdentityKeys {
            curve25519: self.identity_key.public_key(),
            ed25519: self.signing_key.public_key(),
        }
    }

    /// Secret identity key, for session establishment.
    pub(crate) fn identity_secret(&self) -> &Curve25519SecretKey {
        &self.identity_key
    }

    /// Sign raw bytes. Deterministic for a given key and message.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.signing_key.sign(message)
    }

    /// Sign the canonical form of a JSON document.
    pub fn sign_json(&self, document: &Value) -> Ed25519Signature {
        self.sign(canonical_json(document).as_bytes())
    }

    /// Build and self-sign this device's key document.
    pub fn sign_identity_keys(&self) -> DeviceKeys {
        let identity = self.identity_keys();
        let mut keys = BTreeMap::new();
        keys.insert(format!("curve25519:{}", self.device_id), identity.curve25519.to_base64());
        keys.insert(format!("ed25519:{}", self.device_id), identity.ed25519.to_base64());

        let mut device_keys = DeviceKeys {
            user_id: self.user_id.clone(),
            device_id: self.device_id.clone(),
            algorithms: vec![OLM_ALGORITHM.to_string(), MEGOLM_ALGORITHM.to_string()],
            keys,
            signatures: BTreeMap::new(),
        };

        let json = json!({
            "user_id": device_keys.user_id,
            "device_id": device_keys.device_id,
            "algorithms": device_keys.algorithms,
            "keys": device_keys.keys,
        });
        let signature = self.sign_json(&json);
        device_keys
            .signatures
            .entry(self.user_id.clone())
            .or_default()
            .insert(format!("ed25519:{}", self.device_id), signature.to_base64());
        device_keys
    }

    /// Maximum number of unconsumed one-time keys the ring will hold.
    pub fn max_number_of_one_time_keys(&self) -> usize {
        MAX_ONE_TIME_KEYS
    }

    /// Generate up to `count` fresh one-time keys.
    ///
    /// Requests beyond the remaining capacity cap silently: the pool is
    /// bounded and the caller learns the actual count from the return
    /// value. This is a policy choice, not an error path; callers
    /// routinely top the pool up to its maximum.
    pub fn generate_one_time_keys(&mut self, count: usize) -> usize {
        let capacity = MAX_ONE_TIME_KEYS.saturating_sub(self.one_time_keys.unconsumed_count());
        let generating = count.min(capacity);
        if generating > 0 {
            self.one_time_keys.generate(generating);
            self.dirty = true;
        }
        tracing::debug!(requested = count, generated = generating, "generated one-time keys");
        generating
    }

    /// Unconsumed one-time keys currently in the pool.
    pub fn unconsumed_one_time_key_count(&self) -> usize {
        self.one_time_keys.unconsumed_count()
    }

    /// One-time keys generated but not yet uploaded, as key id to public
    /// key.
    pub fn one_time_keys(&self) -> BTreeMap<String, Curve25519PublicKey> {
        self.one_time_keys.unpublished().map(|(id, key)| (id.to_string(), key)).collect()
    }

    /// Sign every unpublished one-time key for upload.
    ///
    /// Each signature covers the canonical JSON of `{"key": <base64>}`;
    /// entries are keyed `signed_curve25519:<key_id>`.
    pub fn sign_one_time_keys(&self) -> BTreeMap<String, SignedOneTimeKey> {
        self.one_time_keys
            .unpublished()
            .map(|(id, key)| {
                let encoded = key.to_base64();
                let signature = self.sign_json(&json!({ "key": encoded }));

                let mut signatures: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
                signatures
                    .entry(self.user_id.clone())
                    .or_default()
                    .insert(format!("ed25519:{}", self.device_id), signature.to_base64());

                (
                    format!("{SIGNED_CURVE25519}:{id}"),
                    SignedOneTimeKey { key: encoded, signatures },
                )
            })
            .collect()
    }

    /// Flag all generated keys as published so they are not offered for
    /// upload twice.
    pub fn mark_keys_as_published(&mut self) {
        if self.one_time_keys.mark_published() > 0 {
            self.dirty = true;
        }
    }

    /// Secret half of a one-time key, without consuming it.
    pub(crate) fn one_time_secret(
        &self,
        public: &Curve25519PublicKey,
    ) -> Option<Curve25519SecretKey> {
        self.one_time_keys.secret_for(public)
    }

    /// Remove a one-time key from the pool after it established an
    /// inbound session.
    ///
    /// Idempotent: a second call for the same key is a no-op. A restore
    /// from a stale pickle can legitimately replay a consumption, so
    /// this is not treated as a logic error.
    pub fn mark_consumed(&mut self, public: &Curve25519PublicKey) {
        if self.one_time_keys.remove(public) {
            self.dirty = true;
        } else {
            tracing::debug!(key = %public, "one-time key already consumed");
        }
    }

    /// Whether unsaved mutations exist. Cleared by
    /// [`serialize`](Self::serialize).
    pub fn needs_persistence(&self) -> bool {
        self.dirty
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRing")
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .field("one_time_keys", &self.one_time_keys.unconsumed_count())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}
