//! A single pairwise session.

use rampart_crypto::{
    Curve25519PublicKey, Curve25519SecretKey, DoubleRatchet, base64_encode, triple_dh_inbound,
    triple_dh_outbound,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{OlmMessage, PreKeyMessage, SessionError};

/// Handshake header state re-attached to every message until the peer
/// confirms the session by answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct PendingPreKey {
    base_key: Curve25519PublicKey,
    one_time_key: Curve25519PublicKey,
}

/// One pairwise session with a remote device.
///
/// Holds the double ratchet plus the identity bookkeeping the store needs
/// to route messages. Obtained through [`Session::new_outbound`] on the
/// initiator side or [`Session::new_inbound`] on the responder side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    session_id: String,
    their_identity_key: Curve25519PublicKey,
    own_identity_key: Curve25519PublicKey,
    ratchet: DoubleRatchet,
    pending_prekey: Option<PendingPreKey>,
}

/// Both sides derive the same id from the handshake keys, so a session
/// can be referenced before any ciphertext exists.
fn derive_session_id(
    initiator_identity: &Curve25519PublicKey,
    responder_identity: &Curve25519PublicKey,
    base_key: &Curve25519PublicKey,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(initiator_identity.as_bytes());
    hasher.update(responder_identity.as_bytes());
    hasher.update(base_key.as_bytes());
    base64_encode(hasher.finalize())
}

fn random_suffix() -> [u8; 8] {
    let mut suffix = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut suffix);
    suffix
}

impl Session {
    /// Initiate a session against one of the peer's published one-time
    /// keys.
    ///
    /// The session can encrypt immediately; every outgoing message is a
    /// pre-key message until the peer's first reply decrypts.
    pub fn new_outbound(
        own_identity: &Curve25519SecretKey,
        their_identity: Curve25519PublicKey,
        their_one_time: Curve25519PublicKey,
    ) -> Result<Self, SessionError> {
        let base = Curve25519SecretKey::generate();
        let base_key = base.public_key();

        let shared = triple_dh_outbound(own_identity, &base, &their_identity, &their_one_time)?;
        let ratchet = DoubleRatchet::init_outbound(&shared, their_one_time)?;

        let own_identity_key = own_identity.public_key();
        Ok(Self {
            session_id: derive_session_id(&own_identity_key, &their_identity, &base_key),
            their_identity_key: their_identity,
            own_identity_key,
            ratchet,
            pending_prekey: Some(PendingPreKey { base_key, one_time_key: their_one_time }),
        })
    }

    /// Answer a pre-key message, consuming the secret half of the
    /// one-time key it targeted.
    ///
    /// Returns the session together with the decrypted first plaintext.
    /// Nothing is constructed unless that decryption succeeds, so a
    /// forged handshake leaves no state behind.
    pub fn new_inbound(
        own_identity: &Curve25519SecretKey,
        one_time_secret: Curve25519SecretKey,
        prekey: &PreKeyMessage,
    ) -> Result<(Self, Vec<u8>), SessionError> {
        let shared = triple_dh_inbound(
            own_identity,
            &one_time_secret,
            &prekey.identity_key,
            &prekey.base_key,
        )?;
        let mut ratchet = DoubleRatchet::init_inbound(&shared, one_time_secret);
        let plaintext = ratchet.decrypt(&prekey.message)?;

        let own_identity_key = own_identity.public_key();
        let session = Self {
            session_id: derive_session_id(&prekey.identity_key, &own_identity_key, &prekey.base_key),
            their_identity_key: prekey.identity_key,
            own_identity_key,
            ratchet,
            pending_prekey: None,
        };
        Ok((session, plaintext))
    }

    /// Stable session identifier, equal on both sides.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The remote device's Curve25519 identity key.
    pub fn their_identity_key(&self) -> Curve25519PublicKey {
        self.their_identity_key
    }

    /// Whether this session is still in the handshake phase.
    pub fn is_pending(&self) -> bool {
        self.pending_prekey.is_some()
    }

    /// Encrypt a message on this session.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<OlmMessage, SessionError> {
        let message = self.ratchet.encrypt(plaintext, random_suffix())?;
        Ok(match self.pending_prekey {
            Some(pending) => OlmMessage::PreKey(PreKeyMessage {
                identity_key: self.own_identity_key,
                base_key: pending.base_key,
                one_time_key: pending.one_time_key,
                message,
            }),
            None => OlmMessage::Normal(message),
        })
    }

    /// Decrypt a message on this session.
    ///
    /// The first successful decryption of a normal message confirms the
    /// handshake; later outgoing messages drop the pre-key header. A
    /// failure leaves both the ratchet and the handshake state untouched.
    pub fn decrypt(&mut self, message: &OlmMessage) -> Result<Vec<u8>, SessionError> {
        let ratchet_message = match message {
            // A pre-key re-send for an established session carries an
            // ordinary ratchet message inside
            OlmMessage::PreKey(prekey) => &prekey.message,
            OlmMessage::Normal(message) => message,
        };
        let plaintext = self.ratchet.decrypt(ratchet_message)?;
        if matches!(message, OlmMessage::Normal(_)) {
            self.pending_prekey = None;
        }
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Device {
        identity: Curve25519SecretKey,
        one_time: Curve25519SecretKey,
    }

    impl Device {
        fn generate() -> Self {
            Self {
                identity: Curve25519SecretKey::generate(),
                one_time: Curve25519SecretKey::generate(),
            }
        }
    }

    fn establish(alice: &Device, bob: &Device) -> (Session, Session, Vec<u8>) {
        let mut outbound = Session::new_outbound(
            &alice.identity,
            bob.identity.public_key(),
            bob.one_time.public_key(),
        )
        .unwrap();

        let first = outbound.encrypt(b"session opener").unwrap();
        let OlmMessage::PreKey(prekey) = first else {
            panic!("first message must be a pre-key message");
        };

        let (inbound, plaintext) =
            Session::new_inbound(&bob.identity, bob.one_time.clone(), &prekey).unwrap();
        (outbound, inbound, plaintext)
    }

    #[test]
    fn establishment_decrypts_first_message() {
        let (_, _, plaintext) = establish(&Device::generate(), &Device::generate());
        assert_eq!(plaintext, b"session opener");
    }

    #[test]
    fn both_sides_derive_the_same_session_id() {
        let (outbound, inbound, _) = establish(&Device::generate(), &Device::generate());
        assert_eq!(outbound.session_id(), inbound.session_id());
    }

    #[test]
    fn prekey_header_persists_until_a_reply_decrypts() {
        let (mut outbound, mut inbound, _) = establish(&Device::generate(), &Device::generate());
        assert!(outbound.is_pending());

        // A second outgoing message still carries the handshake header
        let second = outbound.encrypt(b"still pending").unwrap();
        assert!(matches!(second, OlmMessage::PreKey(_)));
        assert_eq!(inbound.decrypt(&second).unwrap(), b"still pending");

        // Decrypting the reply confirms the session
        let reply = inbound.encrypt(b"reply").unwrap();
        assert!(matches!(reply, OlmMessage::Normal(_)));
        assert_eq!(outbound.decrypt(&reply).unwrap(), b"reply");
        assert!(!outbound.is_pending());

        let third = outbound.encrypt(b"confirmed").unwrap();
        assert!(matches!(third, OlmMessage::Normal(_)));
        assert_eq!(inbound.decrypt(&third).unwrap(), b"confirmed");
    }

    #[test]
    fn forged_prekey_message_creates_no_session() {
        let alice = Device::generate();
        let bob = Device::generate();

        let mut outbound = Session::new_outbound(
            &alice.identity,
            bob.identity.public_key(),
            bob.one_time.public_key(),
        )
        .unwrap();
        let OlmMessage::PreKey(mut prekey) = outbound.encrypt(b"hello").unwrap() else {
            panic!("expected a pre-key message");
        };
        prekey.message.sealed.ciphertext[0] ^= 0xFF;

        let result = Session::new_inbound(&bob.identity, bob.one_time.clone(), &prekey);
        assert!(matches!(result, Err(SessionError::DecryptionFailed { .. })));
    }

    #[test]
    fn sessions_track_the_remote_identity() {
        let alice = Device::generate();
        let bob = Device::generate();
        let (outbound, inbound, _) = establish(&alice, &bob);

        assert_eq!(outbound.their_identity_key(), bob.identity.public_key());
        assert_eq!(inbound.their_identity_key(), alice.identity.public_key());
    }
}
