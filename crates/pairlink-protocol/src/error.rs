use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid rendezvous identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid pairing payload: {0}")]
    InvalidPayload(String),

    #[error("not a channel-open message")]
    NotChannelOpen,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}
