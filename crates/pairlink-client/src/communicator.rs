//! Rendezvous addressing and pairing payloads.
//!
//! Everything here is pure: no relay calls, no shared state.

use std::sync::Arc;

use pairlink_crypto::{public_key_from_hex, public_key_hash_hex, sealed, CryptoError, KeyPair};
use pairlink_protocol::codec::{self, parse_channel_open};
use pairlink_protocol::{AppMetadata, PairingPayload, PeerIdentity, RelayEvent, RendezvousIdentifier};

use crate::error::PairingError;

pub struct PairingCommunicator {
    key_pair: Arc<KeyPair>,
    metadata: AppMetadata,
}

impl PairingCommunicator {
    pub fn new(key_pair: Arc<KeyPair>, metadata: AppMetadata) -> Self {
        Self { key_pair, metadata }
    }

    pub fn metadata(&self) -> &AppMetadata {
        &self.metadata
    }

    /// Rendezvous identifier of the owner of `peer_public_key` on `relay_server`.
    pub fn recipient_identifier(
        &self,
        peer_public_key: &str,
        relay_server: &str,
    ) -> Result<RendezvousIdentifier, PairingError> {
        let key = public_key_from_hex(peer_public_key)
            .map_err(|e| PairingError::InvalidPublicKey(e.to_string()))?;
        Ok(RendezvousIdentifier::new(&public_key_hash_hex(&key), relay_server)?)
    }

    /// This client's own rendezvous identifier.
    pub fn own_identifier(&self, relay_server: &str) -> Result<RendezvousIdentifier, PairingError> {
        Ok(RendezvousIdentifier::new(
            &self.key_pair.public_key_hash_hex(),
            relay_server,
        )?)
    }

    /// Encoded pairing payload for `peer`, shaped by the version it declared.
    pub fn pairing_payload(
        &self,
        peer: &PeerIdentity,
        relay_server: &str,
    ) -> Result<Vec<u8>, PairingError> {
        let payload = PairingPayload::for_peer(
            peer,
            &self.key_pair.public_key_hex(),
            &self.metadata,
            relay_server,
        );
        Ok(payload.encode()?)
    }

    /// Whether `event` was sent by the owner of `peer_public_key`.
    pub fn is_message_from(&self, event: &RelayEvent, peer_public_key: &str) -> bool {
        let Ok(key) = public_key_from_hex(peer_public_key) else {
            return false;
        };
        let Some(sender) = event.sender() else {
            return false;
        };
        match RendezvousIdentifier::parse(sender) {
            Ok(identifier) => identifier.matches_hash(&public_key_hash_hex(&key)),
            Err(_) => false,
        }
    }

    pub fn channel_open_envelope(&self, recipient: &RendezvousIdentifier, payload: &str) -> String {
        codec::channel_open_envelope(recipient, payload)
    }

    /// Channel-open message announcing this client to `peer`.
    ///
    /// The pairing payload is sealed to the peer's public key, so only the
    /// peer can read the metadata and relay server it carries.
    pub fn channel_open_message(
        &self,
        peer: &PeerIdentity,
        relay_server: &str,
    ) -> Result<String, PairingError> {
        let recipient = self.recipient_identifier(&peer.public_key, &peer.relay_server)?;
        let peer_key = public_key_from_hex(&peer.public_key)
            .map_err(|e| PairingError::InvalidPublicKey(e.to_string()))?;

        let payload = self.pairing_payload(peer, relay_server)?;
        let sealed = sealed::seal(&payload, &peer_key)?;
        Ok(self.channel_open_envelope(&recipient, &hex::encode(sealed)))
    }

    /// Read a channel-open message addressed to this client.
    ///
    /// `sender` is the relay user that posted `body`; its hash must match the
    /// public key inside the payload.
    pub fn open_channel_message(&self, sender: &str, body: &str) -> Result<PeerIdentity, PairingError> {
        let (recipient, payload) = parse_channel_open(body)?;
        if !recipient.matches_hash(&self.key_pair.public_key_hash_hex()) {
            return Err(PairingError::WrongRecipient);
        }
        let sender = RendezvousIdentifier::parse(sender)?;

        let sealed = hex::decode(&payload)
            .map_err(|_| CryptoError::InvalidMessage("sealed payload is not hex"))?;
        let opened = sealed::open(&sealed, &self.key_pair)?;
        let decoded = PairingPayload::decode(&opened)?;

        let peer_key = public_key_from_hex(decoded.public_key())
            .map_err(|e| PairingError::InvalidPublicKey(e.to_string()))?;
        if !sender.matches_hash(&public_key_hash_hex(&peer_key)) {
            return Err(PairingError::SenderMismatch);
        }
        Ok(decoded.into_peer(sender.relay_server()))
    }
}

#[cfg(test)]
mod tests {
    use pairlink_protocol::pairing::PAIRING_RESPONSE_TYPE;

    use super::*;

    fn communicator(seed: u8, name: &str) -> (Arc<KeyPair>, PairingCommunicator) {
        let pair = Arc::new(KeyPair::from_seed(&[seed; 32]));
        let metadata = AppMetadata {
            name: name.into(),
            icon: Some("https://example.org/icon.png".into()),
            app_url: None,
        };
        (pair.clone(), PairingCommunicator::new(pair, metadata))
    }

    fn peer_of(pair: &KeyPair, version: &str) -> PeerIdentity {
        PeerIdentity {
            id: "request-42".into(),
            name: "Demo dApp".into(),
            public_key: pair.public_key_hex(),
            relay_server: "dapp-relay.example.org".into(),
            version: version.into(),
            icon: None,
            app_url: None,
            paired: false,
        }
    }

    #[test]
    fn recipient_identifier_uses_key_hash() {
        let (_, wallet) = communicator(1, "Wallet");
        let dapp = KeyPair::from_seed(&[2u8; 32]);
        let id = wallet
            .recipient_identifier(&dapp.public_key_hex(), "relay.example.org")
            .unwrap();
        assert_eq!(id.hash(), dapp.public_key_hash_hex());
        assert_eq!(id.relay_server(), "relay.example.org");
        assert_eq!(id.to_string(), format!("@{}:relay.example.org", dapp.public_key_hash_hex()));
    }

    #[test]
    fn recipient_identifier_rejects_bad_key() {
        let (_, wallet) = communicator(1, "Wallet");
        assert!(matches!(
            wallet.recipient_identifier("not-hex", "relay.example.org"),
            Err(PairingError::InvalidPublicKey(_))
        ));
        assert!(matches!(
            wallet.recipient_identifier("abcd", "relay.example.org"),
            Err(PairingError::InvalidPublicKey(_))
        ));
    }

    #[test]
    fn v1_payload_has_no_metadata() {
        let (pair, wallet) = communicator(1, "Wallet");
        let peer = peer_of(&KeyPair::from_seed(&[2u8; 32]), "1");
        let bytes = wallet.pairing_payload(&peer, "relay.example.org").unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, pair.public_key_hex());
        assert!(!text.contains("Wallet"));
    }

    #[test]
    fn v2_payload_echoes_request() {
        let (pair, wallet) = communicator(1, "Wallet");
        let peer = peer_of(&KeyPair::from_seed(&[2u8; 32]), "2");
        let bytes = wallet.pairing_payload(&peer, "relay.example.org").unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["id"], "request-42");
        assert_eq!(json["type"], PAIRING_RESPONSE_TYPE);
        assert_eq!(json["name"], "Wallet");
        assert_eq!(json["version"], "2");
        assert_eq!(json["publicKey"], pair.public_key_hex());
        assert_eq!(json["relayServer"], "relay.example.org");
        assert_eq!(json["icon"], "https://example.org/icon.png");
        assert!(json.get("appUrl").is_none());
    }

    #[test]
    fn message_origin_check() {
        let (_, wallet) = communicator(1, "Wallet");
        let dapp = KeyPair::from_seed(&[2u8; 32]);
        let stranger = KeyPair::from_seed(&[3u8; 32]);

        let from_dapp = RelayEvent::TextMessage {
            room_id: "!r:relay".into(),
            sender: format!("@{}:relay.example.org", dapp.public_key_hash_hex()),
            body: "hi".into(),
        };
        assert!(wallet.is_message_from(&from_dapp, &dapp.public_key_hex()));
        assert!(!wallet.is_message_from(&from_dapp, &stranger.public_key_hex()));
        assert!(!wallet.is_message_from(&from_dapp, "garbage"));

        let malformed = RelayEvent::TextMessage {
            room_id: "!r:relay".into(),
            sender: "no-at-sign".into(),
            body: "hi".into(),
        };
        assert!(!wallet.is_message_from(&malformed, &dapp.public_key_hex()));

        let anonymous = RelayEvent::Invite { room_id: "!r:relay".into(), sender: None };
        assert!(!wallet.is_message_from(&anonymous, &dapp.public_key_hex()));
    }

    #[test]
    fn channel_open_roundtrip_v2() {
        let (wallet_pair, wallet) = communicator(1, "Wallet");
        let (dapp_pair, dapp) = communicator(2, "Demo dApp");
        let request = peer_of(&dapp_pair, "2");

        let message = wallet.channel_open_message(&request, "wallet-relay.example.org").unwrap();
        assert!(codec::is_channel_open(&message));

        let sender = format!("@{}:wallet-relay.example.org", wallet_pair.public_key_hash_hex());
        let peer = dapp.open_channel_message(&sender, &message).unwrap();
        assert_eq!(peer.public_key, wallet_pair.public_key_hex());
        assert_eq!(peer.id, "request-42");
        assert_eq!(peer.name, "Wallet");
        assert_eq!(peer.relay_server, "wallet-relay.example.org");
    }

    #[test]
    fn channel_open_roundtrip_v1() {
        let (wallet_pair, wallet) = communicator(1, "Wallet");
        let (dapp_pair, dapp) = communicator(2, "Demo dApp");
        let request = peer_of(&dapp_pair, "1");

        let message = wallet.channel_open_message(&request, "wallet-relay.example.org").unwrap();
        let sender = format!("@{}:wallet-relay.example.org", wallet_pair.public_key_hash_hex());
        let peer = dapp.open_channel_message(&sender, &message).unwrap();
        assert_eq!(peer.version, "1");
        assert_eq!(peer.public_key, wallet_pair.public_key_hex());
        assert_eq!(peer.relay_server, "wallet-relay.example.org");
        assert!(peer.name.is_empty());
    }

    #[test]
    fn channel_open_for_someone_else() {
        let (wallet_pair, wallet) = communicator(1, "Wallet");
        let (dapp_pair, _) = communicator(2, "Demo dApp");
        let (_, other) = communicator(3, "Other");

        let message = wallet
            .channel_open_message(&peer_of(&dapp_pair, "2"), "relay.example.org")
            .unwrap();
        let sender = format!("@{}:relay.example.org", wallet_pair.public_key_hash_hex());
        assert!(matches!(
            other.open_channel_message(&sender, &message),
            Err(PairingError::WrongRecipient)
        ));
    }

    #[test]
    fn channel_open_from_impostor() {
        let (_, wallet) = communicator(1, "Wallet");
        let (dapp_pair, dapp) = communicator(2, "Demo dApp");
        let impostor = KeyPair::from_seed(&[9u8; 32]);

        let message = wallet
            .channel_open_message(&peer_of(&dapp_pair, "2"), "relay.example.org")
            .unwrap();
        let sender = format!("@{}:relay.example.org", impostor.public_key_hash_hex());
        assert!(matches!(
            dapp.open_channel_message(&sender, &message),
            Err(PairingError::SenderMismatch)
        ));
    }
}
