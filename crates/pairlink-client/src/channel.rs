//! End-to-end encrypted peer channels.
//!
//! Session keys are derived once per peer and cached until the pairing is
//! removed. The registry is shared by every task sending or receiving on
//! behalf of this client.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use pairlink_crypto::{cipher, derive_session_keys, public_key_from_hex, CryptoError, KeyPair, SessionKeyPair};
use pairlink_protocol::PeerId;

pub struct EncryptedChannel {
    key_pair: Arc<KeyPair>,
    sessions: DashMap<PeerId, SessionKeyPair>,
}

impl EncryptedChannel {
    pub fn new(key_pair: Arc<KeyPair>) -> Self {
        Self {
            key_pair,
            sessions: DashMap::new(),
        }
    }

    /// Session keys shared with the owner of `peer_public_key`.
    pub fn session_keys(&self, peer_public_key: &str) -> Result<SessionKeyPair, CryptoError> {
        let peer_id = peer_public_key.to_ascii_lowercase();
        if let Some(keys) = self.sessions.get(&peer_id) {
            return Ok(keys.value().clone());
        }

        let peer_key = public_key_from_hex(peer_public_key)?;
        let keys = derive_session_keys(&self.key_pair, &peer_key)?;
        debug!(peer = %peer_id, "derived session keys");
        Ok(self.sessions.entry(peer_id).or_insert(keys).value().clone())
    }

    pub fn encrypt(&self, peer_public_key: &str, plaintext: &[u8]) -> Result<String, CryptoError> {
        let keys = self.session_keys(peer_public_key)?;
        cipher::encrypt(plaintext, &keys.send)
    }

    pub fn decrypt(&self, peer_public_key: &str, ciphertext: &str) -> Result<Vec<u8>, CryptoError> {
        let keys = self.session_keys(peer_public_key)?;
        cipher::decrypt(ciphertext, &keys.receive)
    }

    pub fn is_valid(ciphertext: &str) -> bool {
        cipher::is_valid(ciphertext)
    }

    /// Drop cached keys for a peer whose pairing was removed.
    pub fn forget(&self, peer_public_key: &str) {
        self.sessions.remove(&peer_public_key.to_ascii_lowercase());
    }

    pub fn cached_peers(&self) -> usize {
        self.sessions.len()
    }
}
