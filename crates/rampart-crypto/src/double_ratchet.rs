//! Pairwise double ratchet.
//!
//! Each side holds a root key, a DH ratchet keypair and two symmetric
//! chains. Every sent message advances the sending chain one step; a
//! received message carrying a new remote ratchet key advances the root
//! (DH ratchet step), replacing both chains. Out-of-order delivery is
//! tolerated within a bounded skip window by caching skipped message
//! keys.
//!
//! # Security Properties
//!
//! - Forward Secrecy: chain keys are overwritten on every advance and the
//!   root key on every DH step
//! - Post-Compromise Security: each DH step mixes fresh ephemeral entropy
//!   into the root
//! - No partial advance: a failed decryption leaves the ratchet exactly
//!   as it was (the attempt runs on a scratch copy, committed only on
//!   success)

use std::collections::HashMap;

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroize;

use crate::{
    aead::{self, NONCE_RANDOM_SIZE, SealedMessage},
    agreement::SharedSecret,
    chain::{ChainKey, ChainOverflow, MessageKey},
    keys::{Curve25519PublicKey, Curve25519SecretKey},
};

/// Label for advancing the root key at a DH ratchet step
const ROOT_STEP_INFO: &[u8] = b"rampartRatchetStepV1";

/// Maximum number of skipped message keys cached per ratchet.
///
/// Messages that would require skipping past this limit are rejected;
/// the cache never evicts, so the limit also bounds memory.
pub const MAX_SKIP: u32 = 256;

/// Errors from double ratchet operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RatchetError {
    /// Authentication failed or the ratchet could not derive the key for
    /// this message. The ratchet state is unchanged.
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for the failure
        reason: String,
    },

    /// The message is outside the out-of-order skip window
    #[error("skip window exceeded: {cached} keys cached, message at counter {requested}")]
    SkipLimitExceeded {
        /// Skipped keys currently cached
        cached: usize,
        /// Counter of the offending message
        requested: u32,
    },

    /// A chain ran out of counter space
    #[error("chain exhausted at counter {current}")]
    ChainExhausted {
        /// Counter at which the overflow was detected
        current: u32,
    },

    /// Encrypt was called before the sending chain exists.
    ///
    /// Only reachable on an inbound-initialized ratchet that has not yet
    /// decrypted its first message; sessions never expose that state.
    #[error("no sending chain established yet")]
    NoSendingChain,
}

impl From<ChainOverflow> for RatchetError {
    fn from(err: ChainOverflow) -> Self {
        Self::ChainExhausted { current: err.current }
    }
}

/// Plaintext ratchet header carried with every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetHeader {
    /// Sender's current DH ratchet public key
    pub ratchet_key: Curve25519PublicKey,
    /// Message counter in the current sending chain
    pub counter: u32,
    /// Length of the previous sending chain
    pub previous_counter: u32,
}

impl RatchetHeader {
    /// Canonical byte encoding, used as AEAD associated data so the
    /// header cannot be tampered with independently of the ciphertext.
    pub fn to_bytes(self) -> [u8; 40] {
        let mut bytes = [0u8; 40];
        bytes[0..32].copy_from_slice(self.ratchet_key.as_bytes());
        bytes[32..36].copy_from_slice(&self.counter.to_be_bytes());
        bytes[36..40].copy_from_slice(&self.previous_counter.to_be_bytes());
        bytes
    }
}

/// A single ratchet-encrypted message: header plus sealed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetMessage {
    /// Plaintext ratchet header (authenticated via associated data)
    pub header: RatchetHeader,
    /// Sealed payload
    pub sealed: SealedMessage,
}

fn kdf_root(root_key: &[u8; 32], dh_output: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let hkdf = Hkdf::<Sha256>::new(Some(root_key), dh_output);
    let mut okm = [0u8; 64];
    let Ok(()) = hkdf.expand(ROOT_STEP_INFO, &mut okm) else {
        unreachable!("64 bytes is a valid HKDF-SHA256 output length");
    };

    let mut new_root = [0u8; 32];
    let mut chain_seed = [0u8; 32];
    new_root.copy_from_slice(&okm[0..32]);
    chain_seed.copy_from_slice(&okm[32..64]);
    okm.zeroize();
    (new_root, chain_seed)
}

/// The double ratchet state for one pairwise session.
///
/// Serde impls exist for the sealed pickle path only.
#[derive(Clone, Serialize, Deserialize)]
pub struct DoubleRatchet {
    root_key: [u8; 32],
    dh_secret: Curve25519SecretKey,
    remote_ratchet_key: Option<Curve25519PublicKey>,
    sending_chain: Option<ChainKey>,
    receiving_chain: Option<ChainKey>,
    previous_sending_length: u32,
    skipped: HashMap<(Curve25519PublicKey, u32), MessageKey>,
}

impl DoubleRatchet {
    /// Initiator-side initialization.
    ///
    /// `their_ratchet_key` is the responder's one-time key, which doubles
    /// as its initial DH ratchet key. The sending chain is ready
    /// immediately; the first DH step on the responder side mirrors it.
    pub fn init_outbound(
        shared: &SharedSecret,
        their_ratchet_key: Curve25519PublicKey,
    ) -> Result<Self, RatchetError> {
        let initial_root = shared.root_key();
        let dh_secret = Curve25519SecretKey::generate();
        let dh = dh_secret
            .diffie_hellman(&their_ratchet_key)
            .map_err(|e| RatchetError::DecryptionFailed { reason: e.to_string() })?;
        let (root_key, send_seed) = kdf_root(&initial_root, &dh);

        Ok(Self {
            root_key,
            dh_secret,
            remote_ratchet_key: Some(their_ratchet_key),
            sending_chain: Some(ChainKey::new(send_seed)),
            receiving_chain: None,
            previous_sending_length: 0,
            skipped: HashMap::new(),
        })
    }

    /// Responder-side initialization.
    ///
    /// `ratchet_secret` is the secret half of the one-time key the
    /// initiator targeted. Both chains are created by the DH step the
    /// first received message triggers.
    pub fn init_inbound(shared: &SharedSecret, ratchet_secret: Curve25519SecretKey) -> Self {
        Self {
            root_key: shared.root_key(),
            dh_secret: ratchet_secret,
            remote_ratchet_key: None,
            sending_chain: None,
            receiving_chain: None,
            previous_sending_length: 0,
            skipped: HashMap::new(),
        }
    }

    /// Counter the next encrypted message will carry, if a sending chain
    /// exists.
    pub fn sending_counter(&self) -> Option<u32> {
        self.sending_chain.as_ref().map(ChainKey::index)
    }

    /// Encrypt a message, advancing the sending chain exactly one step.
    ///
    /// Output is non-deterministic across calls with identical input: the
    /// chain state differs and the nonce carries fresh randomness.
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        random_suffix: [u8; NONCE_RANDOM_SIZE],
    ) -> Result<RatchetMessage, RatchetError> {
        let chain = self.sending_chain.as_mut().ok_or(RatchetError::NoSendingChain)?;

        let header = RatchetHeader {
            ratchet_key: self.dh_secret.public_key(),
            counter: chain.index(),
            previous_counter: self.previous_sending_length,
        };
        let message_key = chain.advance()?;
        let sealed = aead::seal(plaintext, &message_key, &header.to_bytes(), random_suffix);

        Ok(RatchetMessage { header, sealed })
    }

    /// Decrypt a message, tolerating out-of-order delivery within
    /// [`MAX_SKIP`].
    ///
    /// On any failure the ratchet state is left unmodified: the attempt
    /// runs on a scratch copy that is committed only on success.
    pub fn decrypt(&mut self, message: &RatchetMessage) -> Result<Vec<u8>, RatchetError> {
        let mut scratch = self.clone();
        let plaintext = scratch.decrypt_inner(message)?;
        *self = scratch;
        Ok(plaintext)
    }

    fn decrypt_inner(&mut self, message: &RatchetMessage) -> Result<Vec<u8>, RatchetError> {
        let header = message.header;
        let associated_data = header.to_bytes();

        // A message we skipped earlier may arrive late; its key is cached.
        if let Some(key) = self.skipped.remove(&(header.ratchet_key, header.counter)) {
            return aead::open(&message.sealed, &key, &associated_data).map_err(|_| {
                RatchetError::DecryptionFailed { reason: "authentication failed".to_string() }
            });
        }

        if self.remote_ratchet_key != Some(header.ratchet_key) {
            self.skip_receiving_keys(header.previous_counter)?;
            self.dh_ratchet(header.ratchet_key)?;
        }
        self.skip_receiving_keys(header.counter)?;

        let chain = self
            .receiving_chain
            .as_mut()
            .ok_or_else(|| RatchetError::DecryptionFailed {
                reason: "no receiving chain for this ratchet key".to_string(),
            })?;
        let message_key = chain.advance()?;

        aead::open(&message.sealed, &message_key, &associated_data).map_err(|_| {
            RatchetError::DecryptionFailed { reason: "authentication failed".to_string() }
        })
    }

    /// Derive and cache message keys for receiving-chain counters below
    /// `until`.
    fn skip_receiving_keys(&mut self, until: u32) -> Result<(), RatchetError> {
        let Some(remote) = self.remote_ratchet_key else {
            return Ok(());
        };
        let Some(chain) = self.receiving_chain.as_mut() else {
            return Ok(());
        };

        while chain.index() < until {
            if self.skipped.len() >= MAX_SKIP as usize {
                return Err(RatchetError::SkipLimitExceeded {
                    cached: self.skipped.len(),
                    requested: until,
                });
            }
            let key = chain.advance()?;
            self.skipped.insert((remote, key.index()), key);
        }
        Ok(())
    }

    /// Advance the root: derive a new receiving chain from the remote's
    /// new ratchet key, then a new sending chain from a fresh keypair.
    fn dh_ratchet(&mut self, their_new_key: Curve25519PublicKey) -> Result<(), RatchetError> {
        self.previous_sending_length = self.sending_chain.as_ref().map_or(0, ChainKey::index);

        let dh = self
            .dh_secret
            .diffie_hellman(&their_new_key)
            .map_err(|e| RatchetError::DecryptionFailed { reason: e.to_string() })?;
        let (root_key, receive_seed) = kdf_root(&self.root_key, &dh);
        self.root_key.zeroize();
        self.root_key = root_key;
        self.receiving_chain = Some(ChainKey::new(receive_seed));
        self.remote_ratchet_key = Some(their_new_key);

        self.dh_secret = Curve25519SecretKey::generate();
        let dh = self
            .dh_secret
            .diffie_hellman(&their_new_key)
            .map_err(|e| RatchetError::DecryptionFailed { reason: e.to_string() })?;
        let (root_key, send_seed) = kdf_root(&self.root_key, &dh);
        self.root_key.zeroize();
        self.root_key = root_key;
        self.sending_chain = Some(ChainKey::new(send_seed));

        Ok(())
    }
}

impl Drop for DoubleRatchet {
    fn drop(&mut self) {
        self.root_key.zeroize();
    }
}

impl std::fmt::Debug for DoubleRatchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleRatchet")
            .field("remote_ratchet_key", &self.remote_ratchet_key)
            .field("sending_counter", &self.sending_counter())
            .field("skipped", &self.skipped.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::{triple_dh_inbound, triple_dh_outbound};

    const SUFFIX: [u8; NONCE_RANDOM_SIZE] = [0x42; NONCE_RANDOM_SIZE];

    /// Establish a fresh ratchet pair via triple-DH, mirroring session
    /// setup: Alice initiates against one of Bob's one-time keys.
    fn ratchet_pair() -> (DoubleRatchet, DoubleRatchet) {
        let alice_identity = Curve25519SecretKey::generate();
        let alice_base = Curve25519SecretKey::generate();
        let bob_identity = Curve25519SecretKey::generate();
        let bob_one_time = Curve25519SecretKey::generate();

        let outbound_secret = triple_dh_outbound(
            &alice_identity,
            &alice_base,
            &bob_identity.public_key(),
            &bob_one_time.public_key(),
        )
        .unwrap();
        let inbound_secret = triple_dh_inbound(
            &bob_identity,
            &bob_one_time,
            &alice_identity.public_key(),
            &alice_base.public_key(),
        )
        .unwrap();

        let alice =
            DoubleRatchet::init_outbound(&outbound_secret, bob_one_time.public_key()).unwrap();
        let bob = DoubleRatchet::init_inbound(&inbound_secret, bob_one_time);
        (alice, bob)
    }

    #[test]
    fn first_message_roundtrip() {
        let (mut alice, mut bob) = ratchet_pair();

        let message = alice.encrypt(b"hello bob", SUFFIX).unwrap();
        let plaintext = bob.decrypt(&message).unwrap();

        assert_eq!(plaintext, b"hello bob");
    }

    #[test]
    fn full_conversation_roundtrip() {
        let (mut alice, mut bob) = ratchet_pair();

        for i in 0..5 {
            let text = format!("alice says {i}");
            let message = alice.encrypt(text.as_bytes(), SUFFIX).unwrap();
            assert_eq!(bob.decrypt(&message).unwrap(), text.as_bytes());

            let text = format!("bob says {i}");
            let message = bob.encrypt(text.as_bytes(), SUFFIX).unwrap();
            assert_eq!(alice.decrypt(&message).unwrap(), text.as_bytes());
        }
    }

    #[test]
    fn same_plaintext_yields_different_ciphertext() {
        let (mut alice, _bob) = ratchet_pair();

        let first = alice.encrypt(b"repeated", SUFFIX).unwrap();
        let second = alice.encrypt(b"repeated", SUFFIX).unwrap();

        assert_ne!(first.sealed.ciphertext, second.sealed.ciphertext);
        assert_eq!(first.header.counter, 0);
        assert_eq!(second.header.counter, 1);
    }

    #[test]
    fn out_of_order_delivery_within_window() {
        let (mut alice, mut bob) = ratchet_pair();

        let first = alice.encrypt(b"first", SUFFIX).unwrap();
        let second = alice.encrypt(b"second", SUFFIX).unwrap();
        let third = alice.encrypt(b"third", SUFFIX).unwrap();

        assert_eq!(bob.decrypt(&third).unwrap(), b"third");
        assert_eq!(bob.decrypt(&first).unwrap(), b"first");
        assert_eq!(bob.decrypt(&second).unwrap(), b"second");
    }

    #[test]
    fn skipped_keys_survive_a_dh_step() {
        let (mut alice, mut bob) = ratchet_pair();

        let skipped = alice.encrypt(b"late", SUFFIX).unwrap();
        let delivered = alice.encrypt(b"on time", SUFFIX).unwrap();
        assert_eq!(bob.decrypt(&delivered).unwrap(), b"on time");

        // A reply forces Alice (and then Bob) through a DH step
        let reply = bob.encrypt(b"reply", SUFFIX).unwrap();
        assert_eq!(alice.decrypt(&reply).unwrap(), b"reply");
        let next = alice.encrypt(b"new chain", SUFFIX).unwrap();
        assert_eq!(bob.decrypt(&next).unwrap(), b"new chain");

        // The message skipped on the old chain still decrypts
        assert_eq!(bob.decrypt(&skipped).unwrap(), b"late");
    }

    #[test]
    fn tampered_message_fails_without_state_change() {
        let (mut alice, mut bob) = ratchet_pair();

        let good = alice.encrypt(b"good", SUFFIX).unwrap();
        let mut bad = good.clone();
        bad.sealed.ciphertext[0] ^= 0xFF;

        let err = bob.decrypt(&bad).unwrap_err();
        assert!(matches!(err, RatchetError::DecryptionFailed { .. }));

        // State untouched: the genuine message still decrypts
        assert_eq!(bob.decrypt(&good).unwrap(), b"good");
    }

    #[test]
    fn tampered_header_fails() {
        let (mut alice, mut bob) = ratchet_pair();

        let mut message = alice.encrypt(b"payload", SUFFIX).unwrap();
        message.header.previous_counter = 0;
        message.header.counter ^= 1;

        assert!(bob.decrypt(&message).is_err());
    }

    #[test]
    fn replayed_message_fails() {
        let (mut alice, mut bob) = ratchet_pair();

        let message = alice.encrypt(b"once", SUFFIX).unwrap();
        assert_eq!(bob.decrypt(&message).unwrap(), b"once");

        // The message key was consumed; a replay cannot find it
        assert!(bob.decrypt(&message).is_err());
    }

    #[test]
    fn skip_window_is_bounded() {
        let (mut alice, mut bob) = ratchet_pair();

        for _ in 0..=MAX_SKIP {
            alice.encrypt(b"dropped", SUFFIX).unwrap();
        }
        let far = alice.encrypt(b"too far", SUFFIX).unwrap();

        let err = bob.decrypt(&far).unwrap_err();
        assert!(matches!(err, RatchetError::SkipLimitExceeded { .. }));
    }

    #[test]
    fn encrypt_before_first_receive_fails_on_inbound_side() {
        let (_alice, mut bob) = ratchet_pair();
        let err = bob.encrypt(b"too early", SUFFIX).unwrap_err();
        assert_eq!(err, RatchetError::NoSendingChain);
    }

    #[test]
    fn dh_step_rotates_ratchet_keys() {
        let (mut alice, mut bob) = ratchet_pair();

        let first = alice.encrypt(b"a", SUFFIX).unwrap();
        bob.decrypt(&first).unwrap();
        let reply = bob.encrypt(b"b", SUFFIX).unwrap();
        alice.decrypt(&reply).unwrap();
        let second = alice.encrypt(b"c", SUFFIX).unwrap();

        assert_ne!(first.header.ratchet_key, second.header.ratchet_key);
    }
}
