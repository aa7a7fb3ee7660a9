//! Fuzz target for pairwise message parsing and trial decryption
//!
//! Message bodies arrive from untrusted peers via the server, so the
//! parser and the session store's decrypt path must survive anything.
//!
//! # Strategy
//!
//! - Arbitrary parts: Random (type, base64 body) pairs through the parser
//! - Arbitrary CBOR: Random bytes presented as both wire message types
//! - Hostile decrypt: Parsed messages fed to a live store with real
//!   sessions and one-time keys
//!
//! # Invariants
//!
//! - Parsing NEVER panics
//! - A message that fails to decrypt leaves the store usable
//! - Garbage pre-key messages never consume a one-time key

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rampart_core::{KeyRing, OlmMessage, PairwiseSessionStore};
use rampart_crypto::Curve25519SecretKey;

#[derive(Debug, Arbitrary)]
struct MessageInput {
    message_type: u8,
    body: Vec<u8>,
    as_base64: bool,
}

fuzz_target!(|input: MessageInput| {
    let parsed = if input.as_base64 {
        let body = rampart_crypto::base64_encode(&input.body);
        OlmMessage::from_parts(input.message_type, &body)
    } else {
        OlmMessage::from_bytes(input.message_type, &input.body)
    };
    let Ok(message) = parsed else { return };

    let mut keyring = KeyRing::new("@fuzz:server", "FUZZDEV");
    keyring.generate_one_time_keys(1);
    let keys_before = keyring.unconsumed_one_time_key_count();
    let mut store = PairwiseSessionStore::new();

    let sender = Curve25519SecretKey::generate().public_key();
    let _ = store.decrypt(&mut keyring, sender, &message);

    // A hostile message must not consume keys or wedge the store
    assert_eq!(keyring.unconsumed_one_time_key_count(), keys_before);
    assert_eq!(store.session_count(&sender), 0);
});
