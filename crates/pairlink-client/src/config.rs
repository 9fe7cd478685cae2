use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use pairlink_protocol::AppMetadata;

/// Client configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Name announced to peers in pairing responses.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    #[serde(default)]
    pub app_icon: Option<String>,

    #[serde(default)]
    pub app_url: Option<String>,

    /// Relay nodes to choose from. Order matters for tie-breaking.
    #[serde(default = "default_relay_nodes")]
    pub relay_nodes: Vec<String>,

    /// Optional hex nonce mixed into node hashes before selection.
    #[serde(default)]
    pub relay_nonce: Option<String>,

    /// Seconds a pairing request waits for a response.
    #[serde(default = "default_pairing_timeout")]
    pub pairing_timeout_secs: u64,

    /// Seconds to wait for an invited peer to join a new channel.
    #[serde(default = "default_join_timeout")]
    pub join_timeout_secs: u64,

    /// Liveness probe timeout per relay node, in milliseconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    #[serde(default)]
    pub sync: SyncConfig,
}

/// Long-poll loop tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub poll_timeout_secs: u64,
    /// Consecutive transient failures tolerated before the error is surfaced.
    pub retry_budget: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

pub fn default_relay_nodes() -> Vec<String> {
    vec![
        "relay-1.pairlink.network".into(),
        "relay-2.pairlink.network".into(),
        "relay-3.pairlink.network".into(),
        "relay-4.pairlink.network".into(),
        "relay-5.pairlink.network".into(),
    ]
}

fn default_app_name() -> String {
    "pairlink".into()
}

fn default_pairing_timeout() -> u64 {
    300
}

fn default_join_timeout() -> u64 {
    60
}

fn default_probe_timeout() -> u64 {
    3000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_timeout_secs: 30,
            retry_budget: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            app_icon: None,
            app_url: None,
            relay_nodes: default_relay_nodes(),
            relay_nonce: None,
            pairing_timeout_secs: default_pairing_timeout(),
            join_timeout_secs: default_join_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.relay_nodes.is_empty() {
            anyhow::bail!("relay_nodes must not be empty");
        }
        self.relay_nonce()?;
        Ok(())
    }

    /// Decoded selection nonce; empty when none is configured.
    pub fn relay_nonce(&self) -> anyhow::Result<Vec<u8>> {
        match &self.relay_nonce {
            Some(nonce) => Ok(hex::decode(nonce)?),
            None => Ok(Vec::new()),
        }
    }

    pub fn app_metadata(&self) -> AppMetadata {
        AppMetadata {
            name: self.app_name.clone(),
            icon: self.app_icon.clone(),
            app_url: self.app_url.clone(),
        }
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
