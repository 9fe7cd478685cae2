//! Identity key generation, hashing and serialization.
//!
//! Each pairlink client has a long-term Ed25519 key pair generated on first
//! launch and persisted by the host. The public key is what peers exchange
//! during pairing; its hash names the client on the relay network.

use std::fmt;

use curve25519_dalek::montgomery::MontgomeryPoint;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;

pub const PUBLIC_KEY_LEN: usize = 32;
pub const HASH_LEN: usize = 32;

/// Hash used for rendezvous identifiers and relay selection (SHA-256).
pub fn generic_hash(data: &[u8]) -> [u8; HASH_LEN] {
    Sha256::digest(data).into()
}

/// Lowercase hex hash of a public key.
pub fn public_key_hash_hex(public_key: &[u8]) -> String {
    hex::encode(generic_hash(public_key))
}

/// Decode and validate a hex Ed25519 public key.
pub fn public_key_from_hex(value: &str) -> Result<[u8; PUBLIC_KEY_LEN], CryptoError> {
    let bytes = hex::decode(value.trim())
        .map_err(|e| CryptoError::InvalidPublicKey(format!("not hex: {e}")))?;
    public_key_from_bytes(&bytes)
}

pub fn public_key_from_bytes(bytes: &[u8]) -> Result<[u8; PUBLIC_KEY_LEN], CryptoError> {
    let array: [u8; PUBLIC_KEY_LEN] = bytes.try_into().map_err(|_| {
        CryptoError::InvalidPublicKey(format!(
            "expected {PUBLIC_KEY_LEN} bytes, got {}",
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&array)
        .map_err(|_| CryptoError::InvalidPublicKey("not a curve point".into()))?;
    Ok(array)
}

/// X25519 form of an Ed25519 public key.
pub(crate) fn x25519_public(public_key: &[u8; PUBLIC_KEY_LEN]) -> Result<MontgomeryPoint, CryptoError> {
    let verifying = VerifyingKey::from_bytes(public_key)
        .map_err(|_| CryptoError::InvalidPublicKey("not a curve point".into()))?;
    Ok(verifying.to_montgomery())
}

/// A long-term Ed25519 key pair.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    pub fn from_seed_hex(seed: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(hex::decode(seed.trim()).map_err(|_| CryptoError::InvalidSeed)?);
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| CryptoError::InvalidSeed)?;
        Ok(Self::from_seed(&seed))
    }

    pub fn seed_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing.to_bytes()))
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    /// Lowercase hex hash of the public key, the hash segment of this
    /// client's rendezvous identifier.
    pub fn public_key_hash_hex(&self) -> String {
        public_key_hash_hex(&self.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    /// Unclamped X25519 scalar bytes derived from the seed.
    pub(crate) fn x25519_secret(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing.to_scalar_bytes())
    }

    pub(crate) fn x25519_public(&self) -> MontgomeryPoint {
        self.signing.verifying_key().to_montgomery()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

/// A serializable form of [`KeyPair`] for host-side persistence.
#[derive(Clone, Serialize, Deserialize)]
pub struct SerializableKeyPair {
    /// 32-byte Ed25519 public key.
    pub public_key: Vec<u8>,
    /// 32-byte Ed25519 seed.
    pub seed: Vec<u8>,
}

impl SerializableKeyPair {
    pub fn from_key_pair(pair: &KeyPair) -> Self {
        Self {
            public_key: pair.public_key().to_vec(),
            seed: pair.signing.to_bytes().to_vec(),
        }
    }

    pub fn to_key_pair(&self) -> Result<KeyPair, CryptoError> {
        let seed: [u8; 32] = self.seed.as_slice().try_into().map_err(|_| CryptoError::InvalidSeed)?;
        let pair = KeyPair::from_seed(&seed);
        if pair.public_key().as_slice() != self.public_key.as_slice() {
            return Err(CryptoError::InvalidSeed);
        }
        Ok(pair)
    }
}
