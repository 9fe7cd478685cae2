use thiserror::Error;

use pairlink_crypto::CryptoError;
use pairlink_protocol::ProtocolError;

use crate::relay::RelayError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("no relay server is available")]
    NoAvailableRelay,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a pairing request is already in progress")]
    PairingAlreadyInProgress,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Error)]
pub enum PairingError {
    #[error("invalid peer public key: {0}")]
    InvalidPublicKey(String),

    #[error("channel-open message is addressed to another recipient")]
    WrongRecipient,

    #[error("pairing payload does not belong to its sender")]
    SenderMismatch,

    #[error("pairing was cancelled")]
    Cancelled,

    #[error("pairing timed out")]
    TimedOut,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration {identifier} failed: {source}")]
    Failed {
        identifier: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors surfaced by [`crate::P2pClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not started")]
    NotStarted,

    #[error("client is already started")]
    AlreadyStarted,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("peer did not join channel {room_id} in time")]
    JoinTimedOut { room_id: String },

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pairing(#[from] PairingError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}
