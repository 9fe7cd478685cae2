//! AES-256-GCM encryption for channel messages.
//!
//! Ciphertexts travel as text message bodies, so they are hex encoded:
//! `hex(nonce(12) || ciphertext || tag(16))`. The nonce is random per
//! message since session keys are long-lived.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::CryptoError;
use crate::session::SessionKey;

/// AES-256-GCM authentication tag size.
pub const GCM_TAG_SIZE: usize = 16;

/// AES-256-GCM nonce size.
pub const NONCE_SIZE: usize = 12;

/// Smallest well-formed ciphertext (empty plaintext), in bytes.
pub const MIN_CIPHERTEXT_LEN: usize = NONCE_SIZE + GCM_TAG_SIZE;

fn to_aead_key(key: &SessionKey) -> Result<LessSafeKey, CryptoError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key.as_bytes())
        .map_err(|_| CryptoError::EncryptionFailed)?;
    Ok(LessSafeKey::new(unbound))
}

/// Encrypt a message with the send key of a peer channel.
pub fn encrypt(plaintext: &[u8], key: &SessionKey) -> Result<String, CryptoError> {
    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rng.fill(&mut nonce_bytes).map_err(|_| CryptoError::Rng)?;

    let aead_key = to_aead_key(key)?;
    let mut in_out = plaintext.to_vec();
    aead_key
        .seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut message = Vec::with_capacity(NONCE_SIZE + in_out.len());
    message.extend_from_slice(&nonce_bytes);
    message.extend_from_slice(&in_out);
    Ok(hex::encode(message))
}

/// Decrypt a message with the receive key of a peer channel.
pub fn decrypt(ciphertext: &str, key: &SessionKey) -> Result<Vec<u8>, CryptoError> {
    if !is_valid(ciphertext) {
        return Err(CryptoError::InvalidMessage("not a channel ciphertext"));
    }
    let mut bytes = hex::decode(ciphertext).map_err(|_| CryptoError::InvalidMessage("not hex"))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&bytes[..NONCE_SIZE]);

    let aead_key = to_aead_key(key)?;
    let plaintext = aead_key
        .open_in_place(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut bytes[NONCE_SIZE..],
        )
        .map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(plaintext.to_vec())
}

/// Cheap structural check run before attempting decryption.
///
/// Rooms are shared with the relay network, so bodies that are not hex or
/// too short to hold a nonce and tag are rejected without touching the key.
pub fn is_valid(ciphertext: &str) -> bool {
    ciphertext.len() % 2 == 0
        && ciphertext.len() / 2 >= MIN_CIPHERTEXT_LEN
        && ciphertext.bytes().all(|b| b.is_ascii_hexdigit())
}
