//! Connection state shared by the client's tasks.
//!
//! All mutations go through [`ConnectionStore::intent`], which applies one
//! action at a time. Changes to the channel map and relay server are
//! persisted before they become visible; a failed write leaves the state
//! untouched.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use pairlink_protocol::{ChannelId, PeerId, PeerIdentity};

use crate::error::{PairingError, StoreError};
use crate::storage::{PersistedState, StorageError};

/// Closed channels remembered so late events on them are ignored.
pub const MAX_INACTIVE_CHANNELS: usize = 256;

/// Handle to a pairing request awaiting its response.
///
/// Resolved at most once. Dropping the request from the store cancels every
/// waiter that has not seen a response yet.
#[derive(Debug, Clone)]
pub struct PendingPairing {
    rx: watch::Receiver<Option<PeerIdentity>>,
}

impl PendingPairing {
    pub fn is_resolved(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn peer(&self) -> Option<PeerIdentity> {
        self.rx.borrow().clone()
    }

    pub async fn wait(mut self) -> Result<PeerIdentity, PairingError> {
        loop {
            let current = self.rx.borrow_and_update().clone();
            if let Some(peer) = current {
                return Ok(peer);
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone().ok_or(PairingError::Cancelled);
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionState {
    pub pending_pairing: Option<PendingPairing>,
    /// Active channel per peer.
    pub active_channels: HashMap<PeerId, ChannelId>,
    pub inactive_channels: HashSet<ChannelId>,
    pub relay_server: Option<String>,
    /// Last sync error surfaced by the sync loop, cleared on recovery.
    pub sync_error: Option<String>,
}

impl ConnectionState {
    pub fn active_channel(&self, peer_id: &str) -> Option<&ChannelId> {
        self.active_channels.get(peer_id)
    }

    pub fn peer_for_channel(&self, channel_id: &str) -> Option<&PeerId> {
        self.active_channels
            .iter()
            .find(|(_, channel)| channel.as_str() == channel_id)
            .map(|(peer, _)| peer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    OnPairingRequested,
    OnPairingCompleted(PeerIdentity),
    DiscardPairingData,
    OnChannelCreated { peer_id: PeerId, channel_id: ChannelId },
    OnChannelEvent { peer_id: PeerId, channel_id: ChannelId },
    OnChannelClosed(ChannelId),
    OnRelayServerSelected(String),
    OnSyncSuccess,
    OnSyncError(String),
    HardReset,
}

struct Inner {
    state: ConnectionState,
    pairing_tx: Option<watch::Sender<Option<PeerIdentity>>>,
    /// Inactive channels, oldest first.
    retired: VecDeque<ChannelId>,
}

impl Inner {
    fn retire(&mut self, channel_id: ChannelId) {
        if !self.state.inactive_channels.insert(channel_id.clone()) {
            return;
        }
        self.retired.push_back(channel_id);
        while self.retired.len() > MAX_INACTIVE_CHANNELS {
            let Some(oldest) = self.retired.pop_front() else {
                break;
            };
            self.state.inactive_channels.remove(&oldest);
        }
    }

    fn revive(&mut self, channel_id: &str) {
        if self.state.inactive_channels.remove(channel_id) {
            self.retired.retain(|c| c != channel_id);
        }
    }
}

pub struct ConnectionStore {
    inner: Mutex<Inner>,
    persisted: PersistedState,
}

impl ConnectionStore {
    /// Restore the channel map and relay server from storage.
    pub async fn load(persisted: PersistedState) -> Result<Self, StorageError> {
        let state = ConnectionState {
            active_channels: persisted.channels().await?,
            relay_server: persisted.relay_server().await?,
            ..Default::default()
        };
        debug!(
            channels = state.active_channels.len(),
            relay = ?state.relay_server,
            "connection state restored"
        );
        Ok(Self {
            inner: Mutex::new(Inner {
                state,
                pairing_tx: None,
                retired: VecDeque::new(),
            }),
            persisted,
        })
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state.clone()
    }

    pub async fn intent(&self, action: ConnectionAction) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        match action {
            ConnectionAction::OnPairingRequested => {
                if inner.state.pending_pairing.as_ref().is_some_and(|p| !p.is_resolved()) {
                    return Err(StoreError::PairingAlreadyInProgress);
                }
                let (tx, rx) = watch::channel(None);
                inner.pairing_tx = Some(tx);
                inner.state.pending_pairing = Some(PendingPairing { rx });
                debug!("pairing requested");
            }

            ConnectionAction::OnPairingCompleted(peer) => match &inner.pairing_tx {
                Some(tx) if tx.borrow().is_none() => {
                    info!(peer = %peer.peer_id(), name = %peer.name, "pairing completed");
                    tx.send_replace(Some(peer));
                }
                Some(_) => debug!("pairing already resolved, ignoring response"),
                None => debug!("no pairing pending, ignoring response"),
            },

            ConnectionAction::DiscardPairingData => {
                inner.pairing_tx = None;
                inner.state.pending_pairing = None;
                debug!("pairing data discarded");
            }

            ConnectionAction::OnChannelCreated { peer_id, channel_id } => {
                let mut active = inner.state.active_channels.clone();
                let previous = active.insert(peer_id.clone(), channel_id.clone());
                self.persisted.set_channels(&active).await?;

                inner.state.active_channels = active;
                inner.revive(&channel_id);
                if let Some(previous) = previous.filter(|p| *p != channel_id) {
                    inner.retire(previous);
                }
                info!(peer = %peer_id, channel = %channel_id, "channel active");
            }

            ConnectionAction::OnChannelEvent { peer_id, channel_id } => {
                if inner.state.inactive_channels.contains(&channel_id) {
                    debug!(channel = %channel_id, "event on inactive channel ignored");
                    return Ok(());
                }
                let previous = inner.state.active_channels.get(&peer_id).cloned();
                if previous.as_ref() == Some(&channel_id) {
                    return Ok(());
                }

                let mut active = inner.state.active_channels.clone();
                active.insert(peer_id.clone(), channel_id.clone());
                self.persisted.set_channels(&active).await?;

                inner.state.active_channels = active;
                if let Some(previous) = previous {
                    inner.retire(previous);
                }
                debug!(peer = %peer_id, channel = %channel_id, "peer moved to channel");
            }

            ConnectionAction::OnChannelClosed(channel_id) => {
                let mut active = inner.state.active_channels.clone();
                active.retain(|_, c| *c != channel_id);
                if active.len() != inner.state.active_channels.len() {
                    self.persisted.set_channels(&active).await?;
                    inner.state.active_channels = active;
                    info!(channel = %channel_id, "channel closed");
                }
                inner.retire(channel_id);
            }

            ConnectionAction::OnRelayServerSelected(server) => {
                self.persisted.set_relay_server(Some(&server)).await?;
                inner.state.relay_server = Some(server);
            }

            ConnectionAction::OnSyncSuccess => {
                if inner.state.sync_error.take().is_some() {
                    info!("sync recovered");
                }
            }

            ConnectionAction::OnSyncError(error) => {
                warn!(error = %error, "sync error surfaced");
                inner.state.sync_error = Some(error);
            }

            ConnectionAction::HardReset => {
                self.persisted.set_channels(&HashMap::new()).await?;
                self.persisted.set_relay_server(None).await?;
                inner.pairing_tx = None;
                inner.retired.clear();
                inner.state = ConnectionState::default();
                info!("connection state reset");
            }
        }

        Ok(())
    }
}
