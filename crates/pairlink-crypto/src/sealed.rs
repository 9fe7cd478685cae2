//! Anonymous sealed messages for pairing payloads.
//!
//! The pairing payload is readable only by the peer whose public key was
//! exchanged out-of-band. A fresh X25519 key pair is generated per message;
//! its public half travels with the ciphertext.
//!
//! Format: [version(1)] [ephemeral public key(32)] [ciphertext + tag(16)]

use curve25519_dalek::montgomery::MontgomeryPoint;
use hkdf::Hkdf;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::cipher::{GCM_TAG_SIZE, NONCE_SIZE};
use crate::error::CryptoError;
use crate::identity::{x25519_public, KeyPair, PUBLIC_KEY_LEN};

const VERSION: u8 = 0x01;
const HEADER_LEN: usize = 1 + 32;
const SEAL_INFO: &[u8] = b"pairlink-sealed-v1";

/// Each seal uses a fresh key, so a fixed nonce is never reused.
const SEAL_NONCE: [u8; NONCE_SIZE] = [0u8; NONCE_SIZE];

fn seal_key(
    shared: &[u8; 32],
    ephemeral: &[u8; 32],
    recipient: &[u8; 32],
) -> Result<LessSafeKey, CryptoError> {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral);
    salt[32..].copy_from_slice(recipient);

    let mut key_bytes = Zeroizing::new([0u8; 32]);
    Hkdf::<Sha256>::new(Some(&salt[..]), shared)
        .expand(SEAL_INFO, key_bytes.as_mut_slice())
        .map_err(|_| CryptoError::KeyDerivation)?;
    let unbound =
        UnboundKey::new(&AES_256_GCM, key_bytes.as_slice()).map_err(|_| CryptoError::KeyDerivation)?;
    Ok(LessSafeKey::new(unbound))
}

/// Seal `plaintext` to the owner of `recipient_public_key` (Ed25519).
pub fn seal(plaintext: &[u8], recipient_public_key: &[u8; PUBLIC_KEY_LEN]) -> Result<Vec<u8>, CryptoError> {
    let recipient = x25519_public(recipient_public_key)?;

    let rng = SystemRandom::new();
    let mut ephemeral_secret = Zeroizing::new([0u8; 32]);
    rng.fill(ephemeral_secret.as_mut_slice())
        .map_err(|_| CryptoError::Rng)?;
    let ephemeral_public = MontgomeryPoint::mul_base_clamped(*ephemeral_secret).to_bytes();

    let shared = Zeroizing::new(recipient.mul_clamped(*ephemeral_secret).to_bytes());
    let key = seal_key(&shared, &ephemeral_public, &recipient.to_bytes())?;

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(Nonce::assume_unique_for_key(SEAL_NONCE), Aad::from([VERSION]), &mut in_out)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut sealed = Vec::with_capacity(HEADER_LEN + in_out.len());
    sealed.push(VERSION);
    sealed.extend_from_slice(&ephemeral_public);
    sealed.extend_from_slice(&in_out);
    Ok(sealed)
}

/// Open a message sealed to `own`'s public key.
pub fn open(sealed: &[u8], own: &KeyPair) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < HEADER_LEN + GCM_TAG_SIZE {
        return Err(CryptoError::InvalidMessage("sealed message too short"));
    }
    if sealed[0] != VERSION {
        return Err(CryptoError::InvalidMessage("unsupported sealed message version"));
    }

    let mut ephemeral_public = [0u8; 32];
    ephemeral_public.copy_from_slice(&sealed[1..HEADER_LEN]);

    let secret = own.x25519_secret();
    let shared = Zeroizing::new(MontgomeryPoint(ephemeral_public).mul_clamped(*secret).to_bytes());
    let key = seal_key(&shared, &ephemeral_public, &own.x25519_public().to_bytes())?;

    let mut ciphertext = sealed[HEADER_LEN..].to_vec();
    let plaintext = key
        .open_in_place(Nonce::assume_unique_for_key(SEAL_NONCE), Aad::from([VERSION]), &mut ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(plaintext.to_vec())
}

/// Check if data starts with a valid sealed-message header.
pub fn has_valid_header(sealed: &[u8]) -> bool {
    sealed.len() >= HEADER_LEN + GCM_TAG_SIZE && sealed[0] == VERSION
}
