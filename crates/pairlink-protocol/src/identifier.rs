//! Rendezvous identifiers: `@<hex hash of public key>:<relay server>`.
//!
//! The same string names a peer on the relay network and is matched against
//! the sender of inbound events. The hash segment ends at the first `:`, so
//! relay servers may carry a port (`@ab12:relay.example.org:8448`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProtocolError;

const PREFIX: char = '@';
const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RendezvousIdentifier {
    hash: String,
    relay_server: String,
}

impl RendezvousIdentifier {
    /// Build an identifier from a hex public-key hash and a relay server.
    pub fn new(hash_hex: &str, relay_server: &str) -> Result<Self, ProtocolError> {
        if !is_hash_segment(hash_hex) || relay_server.is_empty() {
            return Err(ProtocolError::InvalidIdentifier(format!(
                "{PREFIX}{hash_hex}{SEPARATOR}{relay_server}"
            )));
        }
        Ok(Self {
            hash: hash_hex.to_ascii_lowercase(),
            relay_server: relay_server.to_string(),
        })
    }

    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidIdentifier(value.to_string());
        let rest = value.strip_prefix(PREFIX).ok_or_else(invalid)?;
        let (hash, relay_server) = rest.split_once(SEPARATOR).ok_or_else(invalid)?;
        if !is_hash_segment(hash) || relay_server.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            hash: hash.to_ascii_lowercase(),
            relay_server: relay_server.to_string(),
        })
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn relay_server(&self) -> &str {
        &self.relay_server
    }

    /// Whether this identifier names the owner of `hash_hex` (any relay server).
    pub fn matches_hash(&self, hash_hex: &str) -> bool {
        self.hash.eq_ignore_ascii_case(hash_hex)
    }
}

fn is_hash_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_hexdigit())
}

impl fmt::Display for RendezvousIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}{SEPARATOR}{}", self.hash, self.relay_server)
    }
}

impl FromStr for RendezvousIdentifier {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RendezvousIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RendezvousIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    #[test]
    fn format_and_parse_roundtrip() {
        let id = RendezvousIdentifier::new(HASH, "relay.example.org").unwrap();
        let text = id.to_string();
        assert_eq!(text, format!("@{HASH}:relay.example.org"));

        let parsed = RendezvousIdentifier::parse(&text).unwrap();
        assert_eq!(parsed.hash(), HASH);
        assert_eq!(parsed.relay_server(), "relay.example.org");
        assert_eq!(parsed, id);
    }

    #[test]
    fn relay_server_with_port() {
        let parsed: RendezvousIdentifier = format!("@{HASH}:relay.example.org:8448").parse().unwrap();
        assert_eq!(parsed.hash(), HASH);
        assert_eq!(parsed.relay_server(), "relay.example.org:8448");
    }

    #[test]
    fn rejects_malformed() {
        for bad in [
            "",
            "@",
            "@:",
            "@abcd",
            "@abcd:",
            "@:relay.example.org",
            "abcd:relay.example.org",
            "@not-hex:relay.example.org",
            "#abcd:relay.example.org",
        ] {
            assert!(
                RendezvousIdentifier::parse(bad).is_err(),
                "accepted malformed identifier {bad:?}"
            );
        }
    }

    #[test]
    fn new_rejects_bad_segments() {
        assert!(RendezvousIdentifier::new("", "relay").is_err());
        assert!(RendezvousIdentifier::new("zz", "relay").is_err());
        assert!(RendezvousIdentifier::new("ab", "").is_err());
    }

    #[test]
    fn hash_is_case_insensitive() {
        let id = RendezvousIdentifier::parse("@ABCD:relay").unwrap();
        assert_eq!(id.hash(), "abcd");
        assert!(id.matches_hash("AbCd"));
        assert!(!id.matches_hash("abce"));
    }

    #[test]
    fn serde_as_string() {
        let id = RendezvousIdentifier::new(HASH, "relay.example.org").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"@{HASH}:relay.example.org\""));
        let back: RendezvousIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<RendezvousIdentifier>("\"nope\"").is_err());
    }
}
