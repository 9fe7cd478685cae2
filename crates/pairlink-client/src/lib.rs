//! pairlink client: relay selection, pairing, encrypted channels and the
//! long-poll sync loop tying them together.

pub mod channel;
pub mod client;
pub mod communicator;
pub mod config;
pub mod context;
pub mod error;
pub mod migration;
pub mod relay;
pub mod selector;
pub mod storage;
pub mod store;
pub mod sync;

pub use channel::EncryptedChannel;
pub use client::{InboundMessage, P2pClient};
pub use communicator::PairingCommunicator;
pub use config::ClientConfig;
pub use context::PairlinkContext;
pub use error::{ClientError, MigrationError, PairingError, SelectError, StoreError};
pub use migration::{Migration, MigrationRunner, MigrationTarget, RelayServerMigration};
pub use relay::{NodeProbe, RelayApi, RelayError, RelaySession, SyncRequest};
pub use selector::{closest_node, RelayServerSelector};
pub use storage::{InMemoryStorage, PersistedState, Storage, StorageError};
pub use store::{ConnectionAction, ConnectionState, ConnectionStore, PendingPairing};
pub use sync::{EventFilter, EventSubscription, RoomSyncEngine, SyncPhase, SyncSettings};
