//! Triple Diffie-Hellman key agreement for pairwise session setup.
//!
//! The initiator combines its identity key and a fresh ephemeral ("base")
//! key with the responder's identity key and one of its published
//! one-time keys:
//!
//! ```text
//! shared = DH(IK_a, OTK_b) || DH(E_a, IK_b) || DH(E_a, OTK_b)
//! ```
//!
//! The responder computes the mirror image from its own secrets. The
//! concatenation is expanded with HKDF-SHA256 into the initial root key
//! of the double ratchet. Because the one-time key contributes to every
//! session, a responder that deletes it after use gets forward secrecy
//! for the handshake itself.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::keys::{Curve25519PublicKey, Curve25519SecretKey, KeyError};

/// Label for expanding the triple-DH output into the initial root key
const ROOT_INFO: &[u8] = b"rampartRootV1";

/// The triple-DH shared secret, zeroized on drop.
pub struct SharedSecret(Zeroizing<[u8; 96]>);

impl SharedSecret {
    /// Expand into the 32-byte initial root key for the double ratchet.
    pub fn root_key(&self) -> [u8; 32] {
        let hkdf = Hkdf::<Sha256>::new(None, self.0.as_slice());
        let mut root = [0u8; 32];
        let Ok(()) = hkdf.expand(ROOT_INFO, &mut root) else {
            unreachable!("32 bytes is a valid HKDF-SHA256 output length");
        };
        root
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

fn concat_dh(
    first: Zeroizing<[u8; 32]>,
    second: Zeroizing<[u8; 32]>,
    third: Zeroizing<[u8; 32]>,
) -> SharedSecret {
    let mut combined = Zeroizing::new([0u8; 96]);
    combined[0..32].copy_from_slice(first.as_ref());
    combined[32..64].copy_from_slice(second.as_ref());
    combined[64..96].copy_from_slice(third.as_ref());
    SharedSecret(combined)
}

/// Initiator-side agreement.
///
/// `base_secret` is the fresh ephemeral key generated for this session;
/// its public half travels in the pre-key message so the responder can
/// run [`triple_dh_inbound`].
///
/// # Errors
///
/// [`KeyError::KeyAgreement`] if any supplied public key is malformed
/// (non-contributory DH output).
pub fn triple_dh_outbound(
    identity_secret: &Curve25519SecretKey,
    base_secret: &Curve25519SecretKey,
    their_identity: &Curve25519PublicKey,
    their_one_time: &Curve25519PublicKey,
) -> Result<SharedSecret, KeyError> {
    let dh1 = identity_secret.diffie_hellman(their_one_time)?;
    let dh2 = base_secret.diffie_hellman(their_identity)?;
    let dh3 = base_secret.diffie_hellman(their_one_time)?;
    Ok(concat_dh(dh1, dh2, dh3))
}

/// Responder-side agreement; mirrors [`triple_dh_outbound`].
///
/// `one_time_secret` is the secret half of the one-time key the
/// initiator targeted.
pub fn triple_dh_inbound(
    identity_secret: &Curve25519SecretKey,
    one_time_secret: &Curve25519SecretKey,
    their_identity: &Curve25519PublicKey,
    their_base: &Curve25519PublicKey,
) -> Result<SharedSecret, KeyError> {
    let dh1 = one_time_secret.diffie_hellman(their_identity)?;
    let dh2 = identity_secret.diffie_hellman(their_base)?;
    let dh3 = one_time_secret.diffie_hellman(their_base)?;
    Ok(concat_dh(dh1, dh2, dh3))
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
