//! pairlink cryptographic layer.
//!
//! This crate provides:
//! - Long-term Ed25519 identity keys and public-key hashing
//! - Per-peer session key derivation (X25519 agreement + HKDF-SHA256)
//! - AES-256-GCM encryption for channel messages
//! - Sealed pairing payloads readable only by the intended peer
//! - Relay login credentials signed with the identity key

pub mod cipher;
pub mod error;
pub mod identity;
pub mod login;
pub mod sealed;
pub mod session;

// Re-export key types for convenience
pub use cipher::{decrypt, encrypt, is_valid};
pub use error::CryptoError;
pub use identity::{generic_hash, public_key_from_hex, public_key_hash_hex, KeyPair, SerializableKeyPair};
pub use login::LoginCredentials;
pub use session::{derive_session_keys, SessionKey, SessionKeyPair};
