//! Property-based tests for the ratchet primitives
//!
//! These tests verify the fundamental invariants of the crypto layer:
//!
//! 1. **Round-trip**: decrypt(encrypt(m)) == m for all messages
//! 2. **Forward motion**: ciphertext differs for identical plaintexts
//! 3. **Group equivalence**: `key_at` matches sequential `advance`
//! 4. **Pickle round-trip**: open(seal(m, pw), pw) == m

use proptest::prelude::*;
use rampart_crypto::{
    Curve25519SecretKey, DoubleRatchet, GroupRatchet, NONCE_RANDOM_SIZE, open_pickle, seal_pickle,
    triple_dh_inbound, triple_dh_outbound,
};

fn ratchet_pair() -> (DoubleRatchet, DoubleRatchet) {
    let alice_identity = Curve25519SecretKey::generate();
    let alice_base = Curve25519SecretKey::generate();
    let bob_identity = Curve25519SecretKey::generate();
    let bob_one_time = Curve25519SecretKey::generate();

    let outbound = triple_dh_outbound(
        &alice_identity,
        &alice_base,
        &bob_identity.public_key(),
        &bob_one_time.public_key(),
    )
    .unwrap();
    let inbound = triple_dh_inbound(
        &bob_identity,
        &bob_one_time,
        &alice_identity.public_key(),
        &alice_base.public_key(),
    )
    .unwrap();

    let alice = DoubleRatchet::init_outbound(&outbound, bob_one_time.public_key()).unwrap();
    let bob = DoubleRatchet::init_inbound(&inbound, bob_one_time);
    (alice, bob)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_pairwise_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 0..1000),
        suffix in any::<[u8; NONCE_RANDOM_SIZE]>(),
    ) {
        let (mut alice, mut bob) = ratchet_pair();

        let message = alice.encrypt(&plaintext, suffix).unwrap();
        let decrypted = bob.decrypt(&message).unwrap();

        prop_assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn prop_pairwise_conversation(
        messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..200), 1..10),
    ) {
        let (mut alice, mut bob) = ratchet_pair();

        // Alternate directions; every message must round-trip
        for (i, plaintext) in messages.iter().enumerate() {
            if i % 2 == 0 {
                let message = alice.encrypt(plaintext, [i as u8; 8]).unwrap();
                prop_assert_eq!(&bob.decrypt(&message).unwrap(), plaintext);
            } else {
                let message = bob.encrypt(plaintext, [i as u8; 8]).unwrap();
                prop_assert_eq!(&alice.decrypt(&message).unwrap(), plaintext);
            }
        }
    }

    #[test]
    fn prop_ciphertext_never_repeats(
        plaintext in prop::collection::vec(any::<u8>(), 1..200),
    ) {
        let (mut alice, _bob) = ratchet_pair();

        let first = alice.encrypt(&plaintext, [0; 8]).unwrap();
        let second = alice.encrypt(&plaintext, [0; 8]).unwrap();

        prop_assert_ne!(first.sealed.ciphertext, second.sealed.ciphertext);
    }

    #[test]
    fn prop_tampering_is_detected(
        plaintext in prop::collection::vec(any::<u8>(), 1..200),
        flip_byte in any::<usize>(),
        flip_bit in 0u8..8,
    ) {
        let (mut alice, mut bob) = ratchet_pair();

        let mut message = alice.encrypt(&plaintext, [0; 8]).unwrap();
        let index = flip_byte % message.sealed.ciphertext.len();
        message.sealed.ciphertext[index] ^= 1 << flip_bit;

        prop_assert!(bob.decrypt(&message).is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_group_key_at_matches_advance(
        seed in any::<[u8; 32]>(),
        count in 1u32..50,
    ) {
        let mut sender = GroupRatchet::new(seed);
        let receiver = GroupRatchet::from_export(seed, 0);

        for i in 0..count {
            let sent = sender.advance().unwrap();
            let derived = receiver.key_at(i).unwrap();
            prop_assert_eq!(sent.key(), derived.key());
        }
    }

    #[test]
    fn prop_group_import_boundary(
        seed in any::<[u8; 32]>(),
        export_at in 1u32..50,
    ) {
        let mut sender = GroupRatchet::new(seed);
        for _ in 0..export_at {
            sender.advance().unwrap();
        }

        let (chain_key, index) = sender.export();
        let receiver = GroupRatchet::from_export(chain_key, index);

        // Anything before the export index is unrecoverable
        prop_assert!(receiver.key_at(index - 1).is_err());
        // The export index itself is fine
        prop_assert!(receiver.key_at(index).is_ok());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_pickle_roundtrip(
        state in prop::collection::vec(any::<u8>(), 0..2000),
        passphrase in "[a-zA-Z0-9 ]{0,40}",
    ) {
        let blob = seal_pickle(&state, &passphrase);
        let opened = open_pickle(&blob, &passphrase).unwrap();
        prop_assert_eq!(opened, state);
    }

    #[test]
    fn prop_pickle_rejects_wrong_passphrase(
        state in prop::collection::vec(any::<u8>(), 0..500),
        passphrase in "[a-z]{1,20}",
    ) {
        let blob = seal_pickle(&state, &passphrase);
        let wrong = format!("{passphrase}x");
        prop_assert!(open_pickle(&blob, &wrong).is_err());
    }
}
