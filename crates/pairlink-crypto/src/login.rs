//! Relay login credentials derived from the identity key.
//!
//! The relay user name is the public-key hash, so a client's rendezvous
//! identifier is predictable by anyone holding its public key. The password
//! is a signature over the current five-minute window, verifiable by a
//! relay that knows how to check Ed25519 logins.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::identity::KeyPair;

/// Length of one login window in seconds.
pub const LOGIN_WINDOW_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    pub user: String,
    pub password: String,
    pub device_id: String,
}

impl LoginCredentials {
    pub fn new(key_pair: &KeyPair, now: SystemTime) -> Self {
        let secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let signature = key_pair.sign(login_message(secs).as_bytes());
        let public_key = key_pair.public_key_hex();

        Self {
            user: key_pair.public_key_hash_hex(),
            password: format!("ed:{}:{}", hex::encode(signature), public_key),
            device_id: public_key,
        }
    }
}

fn login_message(unix_secs: u64) -> String {
    format!("login:{}", unix_secs / LOGIN_WINDOW_SECS)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    use super::*;

    #[test]
    fn credentials_shape() {
        let pair = KeyPair::from_seed(&[9u8; 32]);
        let creds = LoginCredentials::new(&pair, UNIX_EPOCH + Duration::from_secs(1_700_000_000));
        assert_eq!(creds.user, pair.public_key_hash_hex());
        assert_eq!(creds.device_id, pair.public_key_hex());

        let parts: Vec<&str> = creds.password.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ed");
        assert_eq!(parts[1].len(), 128);
        assert_eq!(parts[2], pair.public_key_hex());
    }

    #[test]
    fn signature_covers_login_window() {
        let pair = KeyPair::generate();
        let secs = 1_700_000_123;
        let creds = LoginCredentials::new(&pair, UNIX_EPOCH + Duration::from_secs(secs));
        let sig_hex = creds.password.split(':').nth(1).unwrap();
        let sig_bytes: [u8; 64] = hex::decode(sig_hex).unwrap().try_into().unwrap();

        let verifying = VerifyingKey::from_bytes(&pair.public_key()).unwrap();
        let signature = Signature::from_bytes(&sig_bytes);
        assert!(verifying
            .verify(format!("login:{}", secs / LOGIN_WINDOW_SECS).as_bytes(), &signature)
            .is_ok());
    }

    #[test]
    fn same_window_same_password() {
        let pair = KeyPair::from_seed(&[3u8; 32]);
        let start = 1_700_000_100;
        let a = LoginCredentials::new(&pair, UNIX_EPOCH + Duration::from_secs(start));
        let b = LoginCredentials::new(&pair, UNIX_EPOCH + Duration::from_secs(start + 10));
        assert_eq!(a, b);
    }
}
