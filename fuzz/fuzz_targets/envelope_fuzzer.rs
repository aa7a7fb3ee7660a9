//! Fuzz target for encrypted-event envelope parsing and decoding
//!
//! Envelopes come straight off the federation wire. Parsing must never
//! panic, and a hostile envelope fed to a live codec must come back
//! intact as undecryptable rather than corrupting session state.
//!
//! # Strategy
//!
//! - Raw JSON: Arbitrary bytes through `EncryptedEnvelope::from_json`
//! - Synthetic envelopes: Well-formed envelopes with arbitrary algorithm,
//!   keys, session ids and ciphertext bodies through a live codec
//!
//! # Invariants
//!
//! - Parsing and decoding NEVER panic
//! - Unknown algorithms are rejected before structural parsing
//! - A failed decode returns the envelope unchanged

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rampart_core::{EncryptedEnvelope, EncryptedEventCodec, KeyRing, TypeRegistry};
use serde_json::json;

#[derive(Debug, Arbitrary)]
enum EnvelopeInput {
    RawJson { bytes: Vec<u8> },
    Synthetic {
        algorithm: String,
        sender_key: String,
        session_id: String,
        room_id: String,
        ciphertext: String,
    },
}

fuzz_target!(|input: EnvelopeInput| {
    let value = match input {
        EnvelopeInput::RawJson { bytes } => {
            let Ok(value) = serde_json::from_slice(&bytes) else { return };
            value
        }
        EnvelopeInput::Synthetic { algorithm, sender_key, session_id, room_id, ciphertext } => {
            json!({
                "event_id": "$fuzz",
                "sender": "@fuzz:server",
                "room_id": room_id,
                "content": {
                    "algorithm": algorithm,
                    "ciphertext": ciphertext,
                    "sender_key": sender_key,
                    "session_id": session_id,
                },
            })
        }
    };

    let Ok(envelope) = EncryptedEnvelope::from_json(&value) else { return };

    let keyring = KeyRing::new("@fuzz:server", "FUZZDEV");
    let mut codec = EncryptedEventCodec::new(keyring, TypeRegistry::new());

    if let Err(failure) = codec.decode(envelope.clone()) {
        assert_eq!(failure.envelope, envelope, "failed decode must return the envelope intact");
    }
});
