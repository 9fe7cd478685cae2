//! Pairing payloads exchanged out-of-band when a channel is opened.
//!
//! v1 peers receive the bare hex public key. Every other peer, including
//! ones declaring a version this crate does not know yet, receives the
//! newest structured shape.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{AppMetadata, PeerIdentity};

pub const PAIRING_RESPONSE_TYPE: &str = "p2p-pairing-response";

/// Version this crate declares for itself in pairing requests.
pub const PAIRING_VERSION: &str = "2";

/// Payload shape selected from the counterpart's declared protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadVersion {
    V1,
    V2,
}

impl PayloadVersion {
    pub fn for_peer(version: &str) -> Self {
        let major = version.trim().split('.').next().unwrap_or_default();
        match major.parse::<u32>() {
            Ok(1) => Self::V1,
            _ => Self::V2,
        }
    }
}

/// v2 pairing response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub version: String,
    pub public_key: String,
    pub relay_server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingPayload {
    /// Lowercase hex public key.
    V1(String),
    V2(PairingResponse),
}

impl PairingPayload {
    /// Build the payload a `peer` expects, announcing `own_public_key` and
    /// the relay server chosen for this side.
    pub fn for_peer(
        peer: &PeerIdentity,
        own_public_key: &str,
        own_metadata: &AppMetadata,
        relay_server: &str,
    ) -> Self {
        match PayloadVersion::for_peer(&peer.version) {
            PayloadVersion::V1 => Self::V1(own_public_key.to_ascii_lowercase()),
            PayloadVersion::V2 => Self::V2(PairingResponse {
                id: peer.id.clone(),
                kind: PAIRING_RESPONSE_TYPE.into(),
                name: own_metadata.name.clone(),
                version: peer.version.clone(),
                public_key: own_public_key.to_ascii_lowercase(),
                relay_server: relay_server.to_string(),
                icon: own_metadata.icon.clone(),
                app_url: own_metadata.app_url.clone(),
            }),
        }
    }

    pub fn version(&self) -> PayloadVersion {
        match self {
            Self::V1(_) => PayloadVersion::V1,
            Self::V2(_) => PayloadVersion::V2,
        }
    }

    pub fn public_key(&self) -> &str {
        match self {
            Self::V1(key) => key,
            Self::V2(response) => &response.public_key,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Self::V1(key) => Ok(key.as_bytes().to_vec()),
            Self::V2(response) => Ok(serde_json::to_vec(response)?),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ProtocolError::InvalidPayload("payload is not UTF-8".into()))?
            .trim();

        if text.starts_with('{') {
            let response: PairingResponse = serde_json::from_str(text)?;
            if response.kind != PAIRING_RESPONSE_TYPE {
                return Err(ProtocolError::InvalidPayload(format!(
                    "unexpected type {:?}",
                    response.kind
                )));
            }
            return Ok(Self::V2(response));
        }

        if text.is_empty() || hex::decode(text).is_err() {
            return Err(ProtocolError::InvalidPayload(
                "v1 payload must be a hex public key".into(),
            ));
        }
        Ok(Self::V1(text.to_ascii_lowercase()))
    }

    /// Turn a received payload into the sender's identity.
    ///
    /// v1 carries no metadata, so the relay server comes from the sender's
    /// rendezvous identifier and the remaining fields stay empty.
    pub fn into_peer(self, sender_relay_server: &str) -> PeerIdentity {
        match self {
            Self::V1(public_key) => PeerIdentity {
                id: String::new(),
                name: String::new(),
                public_key,
                relay_server: sender_relay_server.to_string(),
                version: "1".into(),
                icon: None,
                app_url: None,
                paired: true,
            },
            Self::V2(response) => PeerIdentity {
                id: response.id,
                name: response.name,
                public_key: response.public_key,
                relay_server: response.relay_server,
                version: response.version,
                icon: response.icon,
                app_url: response.app_url,
                paired: true,
            },
        }
    }
}
