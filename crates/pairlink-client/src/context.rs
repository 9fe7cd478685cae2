use std::sync::Arc;

use pairlink_crypto::KeyPair;

use crate::channel::EncryptedChannel;
use crate::communicator::PairingCommunicator;
use crate::config::ClientConfig;
use crate::relay::RelayApi;
use crate::storage::{PersistedState, Storage, StorageError};
use crate::store::ConnectionStore;

/// Everything a client needs, built once by the host application.
pub struct PairlinkContext {
    pub config: ClientConfig,
    pub key_pair: Arc<KeyPair>,
    pub relay: Arc<dyn RelayApi>,
    pub persisted: PersistedState,
    pub channel: Arc<EncryptedChannel>,
    pub store: Arc<ConnectionStore>,
    pub communicator: Arc<PairingCommunicator>,
}

impl PairlinkContext {
    pub async fn new(
        config: ClientConfig,
        key_pair: KeyPair,
        storage: Arc<dyn Storage>,
        relay: Arc<dyn RelayApi>,
    ) -> Result<Arc<Self>, StorageError> {
        let key_pair = Arc::new(key_pair);
        let persisted = PersistedState::new(storage);
        let store = Arc::new(ConnectionStore::load(persisted.clone()).await?);
        let communicator = Arc::new(PairingCommunicator::new(
            key_pair.clone(),
            config.app_metadata(),
        ));

        Ok(Arc::new(Self {
            channel: Arc::new(EncryptedChannel::new(key_pair.clone())),
            config,
            key_pair,
            relay,
            persisted,
            store,
            communicator,
        }))
    }
}
