//! Key-value persistence used across restarts.
//!
//! The host supplies a [`Storage`] backend; [`PersistedState`] gives the
//! rest of the crate typed access to the handful of values it keeps.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use pairlink_protocol::{ChannelId, PeerId, RelayRoom};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("corrupt value for {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: postcard::Error,
    },
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Volatile storage, for tests and one-shot CLI runs.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    values: DashMap<String, Vec<u8>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.values.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.values.remove(key);
        Ok(())
    }
}

pub mod keys {
    pub const RELAY_SERVER: &str = "pairlink:relay_server";
    pub const CHANNELS: &str = "pairlink:channels";
    pub const SYNC_TOKEN: &str = "pairlink:sync_token";
    pub const ROOMS: &str = "pairlink:rooms";
    pub const MIGRATIONS: &str = "pairlink:migrations";
    pub const SDK_VERSION: &str = "pairlink:sdk_version";
}

/// Typed view over a [`Storage`] backend. Values are postcard encoded.
#[derive(Clone)]
pub struct PersistedState {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for PersistedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedState").finish_non_exhaustive()
    }
}

impl PersistedState {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Volatile state backed by a fresh [`InMemoryStorage`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStorage::new()))
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.storage.get(key).await? {
            Some(bytes) => postcard::from_bytes(&bytes)
                .map(Some)
                .map_err(|source| StorageError::Corrupt {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    async fn store<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let bytes = postcard::to_allocvec(value).map_err(|source| StorageError::Corrupt {
            key: key.to_string(),
            source,
        })?;
        self.storage.set(key, bytes).await
    }

    /// The last relay server used.
    pub async fn relay_server(&self) -> Result<Option<String>, StorageError> {
        self.load(keys::RELAY_SERVER).await
    }

    pub async fn set_relay_server(&self, server: Option<&str>) -> Result<(), StorageError> {
        match server {
            Some(server) => self.store(keys::RELAY_SERVER, server).await,
            None => self.storage.remove(keys::RELAY_SERVER).await,
        }
    }

    /// Active channel per peer.
    pub async fn channels(&self) -> Result<HashMap<PeerId, ChannelId>, StorageError> {
        Ok(self.load(keys::CHANNELS).await?.unwrap_or_default())
    }

    pub async fn set_channels(&self, channels: &HashMap<PeerId, ChannelId>) -> Result<(), StorageError> {
        if channels.is_empty() {
            return self.storage.remove(keys::CHANNELS).await;
        }
        self.store(keys::CHANNELS, channels).await
    }

    pub async fn sync_token(&self) -> Result<Option<String>, StorageError> {
        self.load(keys::SYNC_TOKEN).await
    }

    pub async fn set_sync_token(&self, token: &str) -> Result<(), StorageError> {
        self.store(keys::SYNC_TOKEN, token).await
    }

    pub async fn rooms(&self) -> Result<Vec<RelayRoom>, StorageError> {
        Ok(self.load(keys::ROOMS).await?.unwrap_or_default())
    }

    pub async fn set_rooms(&self, rooms: &[RelayRoom]) -> Result<(), StorageError> {
        self.store(keys::ROOMS, rooms).await
    }

    /// Whether a relay session has ever been kept in this storage: a sync
    /// token, known rooms or an active channel.
    pub async fn has_session_state(&self) -> Result<bool, StorageError> {
        Ok(self.sync_token().await?.is_some()
            || !self.rooms().await?.is_empty()
            || !self.channels().await?.is_empty())
    }

    /// Identifiers of migrations already applied.
    pub async fn migrations(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.load(keys::MIGRATIONS).await?.unwrap_or_default())
    }

    pub async fn add_migration(&self, identifier: &str) -> Result<(), StorageError> {
        let mut done = self.migrations().await?;
        if done.insert(identifier.to_string()) {
            self.store(keys::MIGRATIONS, &done).await?;
        }
        Ok(())
    }

    /// Last SDK version that ran against this storage.
    pub async fn sdk_version(&self) -> Result<Option<String>, StorageError> {
        self.load(keys::SDK_VERSION).await
    }

    pub async fn set_sdk_version(&self, version: &str) -> Result<(), StorageError> {
        self.store(keys::SDK_VERSION, version).await
    }
}
