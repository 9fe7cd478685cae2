//! Contract of the relay network client.
//!
//! The HTTP implementation lives with the host application; this crate only
//! needs the calls below. Every call distinguishes transport failures
//! (worth retrying) from protocol-level rejections.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use pairlink_crypto::LoginCredentials;
use pairlink_protocol::SyncResponse;

/// An authenticated connection to one relay server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySession {
    pub server: String,
    /// Relay user id, `@<public key hash>:<server>`.
    pub user_id: String,
    pub access_token: String,
}

/// One long-poll request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Continuation token from the previous response.
    pub since: Option<String>,
    /// How long the relay may hold the request open.
    pub timeout: Duration,
}

#[derive(Debug, Clone, Error)]
pub enum RelayError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("rejected by relay ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl RelayError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Forbidden(_) => false,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

/// Lightweight reachability check for relay nodes.
#[async_trait]
pub trait NodeProbe: Send + Sync {
    async fn is_up(&self, node: &str) -> bool;
}

#[async_trait]
pub trait RelayApi: NodeProbe {
    async fn login(
        &self,
        node: &str,
        credentials: &LoginCredentials,
    ) -> Result<RelaySession, RelayError>;

    async fn sync(
        &self,
        session: &RelaySession,
        request: &SyncRequest,
    ) -> Result<SyncResponse, RelayError>;

    /// Create a room, inviting `invitees`. Returns the room id.
    async fn create_room(
        &self,
        session: &RelaySession,
        invitees: &[String],
    ) -> Result<String, RelayError>;

    async fn invite(
        &self,
        session: &RelaySession,
        room_id: &str,
        user_id: &str,
    ) -> Result<(), RelayError>;

    async fn join_room(&self, session: &RelaySession, room_id: &str) -> Result<(), RelayError>;

    async fn send_event(
        &self,
        session: &RelaySession,
        room_id: &str,
        body: &str,
    ) -> Result<(), RelayError>;
}
