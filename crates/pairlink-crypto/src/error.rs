use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid secret seed")]
    InvalidSeed,

    #[error("malformed message: {0}")]
    InvalidMessage(&'static str),

    #[error("decryption failed: invalid key or tampered data")]
    DecryptionFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("RNG failed")]
    Rng,

    #[error("key derivation failed")]
    KeyDerivation,
}
