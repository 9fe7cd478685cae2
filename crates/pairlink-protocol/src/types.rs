use serde::{Deserialize, Serialize};

/// Peer identifier: the peer's long-term public key, lowercase hex.
pub type PeerId = String;

/// Channel identifier: the relay room carrying one peer channel.
pub type ChannelId = String;

/// A counterpart known to the application.
///
/// Created from a pairing request (wallet side) or a pairing response
/// (dApp side) and never mutated afterwards; [`PeerIdentity::paired`]
/// returns the confirmed copy once the handshake completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Pairing-request identifier, echoed back in v2 responses.
    pub id: String,
    pub name: String,
    /// 32-byte Ed25519 public key, lowercase hex.
    pub public_key: String,
    pub relay_server: String,
    /// Protocol version declared by the peer ("1", "2", ...).
    pub version: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub app_url: Option<String>,
    #[serde(default)]
    pub paired: bool,
}

impl PeerIdentity {
    pub fn paired(&self) -> Self {
        Self {
            paired: true,
            ..self.clone()
        }
    }

    /// Stable key used by the connection store and session registry.
    pub fn peer_id(&self) -> PeerId {
        self.public_key.to_ascii_lowercase()
    }
}

/// Metadata describing the local application, sent in v2 pairing responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub app_url: Option<String>,
}
