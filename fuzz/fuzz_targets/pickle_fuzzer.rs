//! Fuzz target for sealed pickle parsing
//!
//! Pickles are read back from disk, so the opener must survive any blob:
//! truncated headers, corrupted ciphertext, version skew, and blobs that
//! were never pickles at all.
//!
//! # Strategy
//!
//! - Raw bytes: Arbitrary blobs straight into `open_pickle`
//! - Mutated pickles: Genuine pickles with byte flips at arbitrary offsets
//! - Wrong passphrase: Genuine pickles opened under a different passphrase
//!
//! # Invariants
//!
//! - `open_pickle` NEVER panics
//! - A mutated pickle or wrong passphrase always errors, never yields
//!   plaintext
//! - Only the exact (blob, passphrase) pair round-trips

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rampart_crypto::{open_pickle, seal_pickle};

#[derive(Debug, Arbitrary)]
enum PickleInput {
    RawBytes { blob: Vec<u8>, passphrase: String },
    Mutated { plaintext: Vec<u8>, passphrase: String, offset: usize, flip: u8 },
    WrongPassphrase { plaintext: Vec<u8>, passphrase: String, wrong: String },
}

fuzz_target!(|input: PickleInput| {
    match input {
        PickleInput::RawBytes { blob, passphrase } => {
            let _ = open_pickle(&blob, &passphrase);
        }
        PickleInput::Mutated { plaintext, passphrase, offset, flip } => {
            let mut blob = seal_pickle(&plaintext, &passphrase);
            if blob.is_empty() || flip == 0 {
                return;
            }
            let index = offset % blob.len();
            blob[index] ^= flip;
            assert!(
                open_pickle(&blob, &passphrase).is_err(),
                "mutated pickle must not open"
            );
        }
        PickleInput::WrongPassphrase { plaintext, passphrase, wrong } => {
            if passphrase == wrong {
                return;
            }
            let blob = seal_pickle(&plaintext, &passphrase);
            assert!(
                open_pickle(&blob, &wrong).is_err(),
                "wrong passphrase must not open"
            );
            assert_eq!(open_pickle(&blob, &passphrase).unwrap(), plaintext);
        }
    }
});
