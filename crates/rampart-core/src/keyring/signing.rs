//! Canonical JSON signing and verification.
//!
//! Signatures over JSON documents must be reproducible across
//! implementations, so the signed form is canonical: lexicographically
//! ordered keys, no insignificant whitespace, and the `signatures` and
//! `unsigned` members stripped before signing. `serde_json` maps are
//! BTree-backed here (the `preserve_order` feature is off), so compact
//! serialization already yields sorted keys.

use std::collections::BTreeMap;

use rampart_crypto::{Ed25519PublicKey, Ed25519Signature, KeyError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Produce the canonical form of a JSON document for signing.
///
/// Top-level `signatures` and `unsigned` members are removed; keys are
/// sorted and whitespace dropped.
pub fn canonical_json(value: &Value) -> String {
    let mut value = value.clone();
    if let Value::Object(map) = &mut value {
        map.remove("signatures");
        map.remove("unsigned");
    }
    value.to_string()
}

/// Verify an Ed25519 signature over the canonical form of `json`.
pub fn verify_signed_json(
    signing_key: &Ed25519PublicKey,
    json: &Value,
    signature: &Ed25519Signature,
) -> Result<(), KeyError> {
    signing_key.verify(canonical_json(json).as_bytes(), signature)
}

/// A device's published key document.
///
/// Carries both public keys under `<algorithm>:<device_id>` entries and
/// a self-signature under the device's Ed25519 key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceKeys {
    /// Owning user id
    pub user_id: String,
    /// Device id
    pub device_id: String,
    /// Encryption algorithms this device supports
    pub algorithms: Vec<String>,
    /// Public keys, keyed by `<algorithm>:<device_id>`
    pub keys: BTreeMap<String, String>,
    /// Signatures, keyed by user id then `ed25519:<device_id>`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signatures: BTreeMap<String, BTreeMap<String, String>>,
}

/// Check that a device-keys document is self-signed by the Ed25519 key
/// it advertises for `device_id`.
///
/// Fails with [`KeyError::BadSignature`] when the key or signature entry
/// is missing, malformed or does not verify.
pub fn verify_identity_signature(
    device_keys: &DeviceKeys,
    device_id: &str,
    user_id: &str,
) -> Result<(), KeyError> {
    let key_entry = format!("ed25519:{device_id}");

    let signing_key = device_keys.keys.get(&key_entry).ok_or(KeyError::BadSignature)?;
    let signing_key = Ed25519PublicKey::from_base64(signing_key)?;

    let signature = device_keys
        .signatures
        .get(user_id)
        .and_then(|by_key| by_key.get(&key_entry))
        .ok_or(KeyError::BadSignature)?;
    let signature = Ed25519Signature::from_base64(signature)?;

    let json = serde_json::to_value(device_keys).map_err(|_| KeyError::BadSignature)?;
    verify_signed_json(&signing_key, &json, &signature)
}

#[cfg(test)]
mod tests {
    use rampart_crypto::Ed25519KeyPair;
    use serde_json::json;

    use super::*;

    #[test]
    fn canonical_form_sorts_keys_and_drops_whitespace() {
        let value = json!({"zebra": 1, "alpha": {"nested_z": true, "nested_a": false}});
        assert_eq!(
            canonical_json(&value),
            r#"{"alpha":{"nested_a":false,"nested_z":true},"zebra":1}"#
        );
    }

    #[test]
    fn canonical_form_strips_signatures_and_unsigned() {
        let value = json!({
            "key": "abc",
            "signatures": {"@user:server": {"ed25519:DEV": "sig"}},
            "unsigned": {"age": 1234},
        });
        assert_eq!(canonical_json(&value), r#"{"key":"abc"}"#);
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let keypair = Ed25519KeyPair::generate();
        let document = json!({"key": "value", "other": 42});

        let signature = keypair.sign(canonical_json(&document).as_bytes());
        verify_signed_json(&keypair.public_key(), &document, &signature).unwrap();
    }

    #[test]
    fn verification_ignores_signatures_member() {
        let keypair = Ed25519KeyPair::generate();
        let document = json!({"key": "value"});
        let signature = keypair.sign(canonical_json(&document).as_bytes());

        // The same signature verifies after attaching it to the document
        let signed = json!({
            "key": "value",
            "signatures": {"@user:server": {"ed25519:DEV": signature.to_base64()}},
        });
        verify_signed_json(&keypair.public_key(), &signed, &signature).unwrap();
    }

    #[test]
    fn tampered_document_fails() {
        let keypair = Ed25519KeyPair::generate();
        let signature = keypair.sign(canonical_json(&json!({"key": "value"})).as_bytes());

        let result =
            verify_signed_json(&keypair.public_key(), &json!({"key": "other"}), &signature);
        assert!(matches!(result, Err(KeyError::BadSignature)));
    }

    #[test]
    fn missing_signature_entry_fails() {
        let device_keys = DeviceKeys {
            user_id: "@alice:server".to_string(),
            device_id: "DEVICE".to_string(),
            algorithms: vec![],
            keys: BTreeMap::new(),
            signatures: BTreeMap::new(),
        };

        let result = verify_identity_signature(&device_keys, "DEVICE", "@alice:server");
        assert!(matches!(result, Err(KeyError::BadSignature)));
    }
}
