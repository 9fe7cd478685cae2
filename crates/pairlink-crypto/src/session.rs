//! Per-peer session key derivation.
//!
//! Both Ed25519 identity keys are converted to X25519 and combined into a
//! shared point. Each direction of the channel gets its own key, expanded
//! with HKDF-SHA256 and salted with `sender || recipient`, so one side's
//! send key is exactly the other side's receive key.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::identity::{x25519_public, KeyPair, PUBLIC_KEY_LEN};

const SESSION_INFO: &[u8] = b"pairlink-session-v1";

/// A 256-bit symmetric key for one direction of a peer channel.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Receive/send keys shared with one paired peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeyPair {
    pub receive: SessionKey,
    pub send: SessionKey,
}

/// Derive the session keys shared between `own` and the peer's public key.
///
/// Deterministic: the same key material always yields the same pair.
pub fn derive_session_keys(
    own: &KeyPair,
    peer_public_key: &[u8; PUBLIC_KEY_LEN],
) -> Result<SessionKeyPair, CryptoError> {
    let peer_x = x25519_public(peer_public_key)?;
    let own_x = own.x25519_public();
    let secret = own.x25519_secret();

    let shared = Zeroizing::new(peer_x.mul_clamped(*secret).to_bytes());
    if shared.iter().all(|b| *b == 0) {
        return Err(CryptoError::InvalidPublicKey("low-order point".into()));
    }

    let own_x = own_x.to_bytes();
    let peer_x = peer_x.to_bytes();
    Ok(SessionKeyPair {
        send: directional_key(&shared, &own_x, &peer_x)?,
        receive: directional_key(&shared, &peer_x, &own_x)?,
    })
}

fn directional_key(
    shared: &[u8; 32],
    sender: &[u8; 32],
    recipient: &[u8; 32],
) -> Result<SessionKey, CryptoError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(sender);
    salt[32..].copy_from_slice(recipient);

    let hk = Hkdf::<Sha256>::new(Some(&salt[..]), shared);
    let mut okm = [0u8; 32];
    hk.expand(SESSION_INFO, &mut okm)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(SessionKey(okm))
}
