//! The bounded pool of one-time prekeys.
//!
//! Keys move through three states: generated (held locally, not yet
//! uploaded), published (uploaded, awaiting use by a peer) and consumed
//! (removed from the pool the moment they establish an inbound session).
//! A consumed key is gone; reuse would break the forward secrecy of the
//! handshake, so removal is the only representation of consumption.

use rampart_crypto::{Curve25519PublicKey, Curve25519SecretKey, base64_encode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OneTimeKey {
    key_id: String,
    secret: Curve25519SecretKey,
    published: bool,
}

/// Pool of unconsumed one-time keys, persisted as part of the key ring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct OneTimeKeyPool {
    next_key_id: u64,
    keys: Vec<OneTimeKey>,
}

impl OneTimeKeyPool {
    /// Generate `count` fresh keys. Key ids are monotonically increasing
    /// and never reused, even across consumption.
    pub(crate) fn generate(&mut self, count: usize) {
        for _ in 0..count {
            let key_id = base64_encode(self.next_key_id.to_be_bytes());
            self.next_key_id += 1;
            self.keys.push(OneTimeKey {
                key_id,
                secret: Curve25519SecretKey::generate(),
                published: false,
            });
        }
    }

    /// Number of unconsumed keys currently in the pool.
    pub(crate) fn unconsumed_count(&self) -> usize {
        self.keys.len()
    }

    /// Keys generated but not yet flagged as published.
    pub(crate) fn unpublished(&self) -> impl Iterator<Item = (&str, Curve25519PublicKey)> {
        self.keys
            .iter()
            .filter(|key| !key.published)
            .map(|key| (key.key_id.as_str(), key.secret.public_key()))
    }

    /// Flag every key as published. Returns how many were flagged.
    pub(crate) fn mark_published(&mut self) -> usize {
        let mut flagged = 0;
        for key in &mut self.keys {
            if !key.published {
                key.published = true;
                flagged += 1;
            }
        }
        flagged
    }

    /// Look up the secret half of a key by its public half.
    pub(crate) fn secret_for(&self, public: &Curve25519PublicKey) -> Option<Curve25519SecretKey> {
        self.keys
            .iter()
            .find(|key| key.secret.public_key() == *public)
            .map(|key| key.secret.clone())
    }

    /// Remove a key from the pool. Returns whether it was present.
    pub(crate) fn remove(&mut self, public: &Curve25519PublicKey) -> bool {
        let before = self.keys.len();
        self.keys.retain(|key| key.secret.public_key() != *public);
        self.keys.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_assigns_unique_ids() {
        let mut pool = OneTimeKeyPool::default();
        pool.generate(3);

        let ids: Vec<_> = pool.unpublished().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids.len(), 3);
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[1], ids[2]);
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let mut pool = OneTimeKeyPool::default();
        pool.generate(1);
        let (first_id, public) =
            pool.unpublished().map(|(id, key)| (id.to_string(), key)).next().unwrap();

        assert!(pool.remove(&public));
        pool.generate(1);

        let second_id = pool.unpublished().map(|(id, _)| id.to_string()).next().unwrap();
        assert_ne!(first_id, second_id);
    }

    #[test]
    fn mark_published_hides_keys_from_upload() {
        let mut pool = OneTimeKeyPool::default();
        pool.generate(2);
        assert_eq!(pool.mark_published(), 2);
        assert_eq!(pool.unpublished().count(), 0);

        pool.generate(1);
        assert_eq!(pool.unpublished().count(), 1);
        // Published keys are still unconsumed
        assert_eq!(pool.unconsumed_count(), 3);
    }

    #[test]
    fn secret_lookup_matches_public_half() {
        let mut pool = OneTimeKeyPool::default();
        pool.generate(2);

        let (_, public) = pool.unpublished().nth(1).unwrap();
        let secret = pool.secret_for(&public).unwrap();
        assert_eq!(secret.public_key(), public);

        let unknown = Curve25519SecretKey::generate().public_key();
        assert!(pool.secret_for(&unknown).is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut pool = OneTimeKeyPool::default();
        pool.generate(1);
        let (_, public) = pool.unpublished().next().unwrap();

        assert!(pool.remove(&public));
        assert!(!pool.remove(&public));
        assert_eq!(pool.unconsumed_count(), 0);
    }
}
