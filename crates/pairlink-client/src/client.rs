//! The peer-to-peer client: pairing, channels and messaging over a relay.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pairlink_crypto::{generic_hash, LoginCredentials};
use pairlink_protocol::codec::is_channel_open;
use pairlink_protocol::pairing::PAIRING_VERSION;
use pairlink_protocol::{ChannelId, PeerId, PeerIdentity, RelayEvent};

use crate::channel::EncryptedChannel;
use crate::config::default_relay_nodes;
use crate::context::PairlinkContext;
use crate::error::{ClientError, PairingError};
use crate::migration::{MigrationRunner, MigrationTarget};
use crate::relay::RelaySession;
use crate::selector::RelayServerSelector;
use crate::store::{ConnectionAction, ConnectionState};
use crate::sync::{EventFilter, EventSubscription, RoomSyncEngine, SyncPhase, SyncSettings};

const INBOUND_BUFFER: usize = 64;

/// A decrypted message received from a paired peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub peer_id: PeerId,
    pub channel_id: ChannelId,
    pub payload: Vec<u8>,
}

struct Running {
    session: RelaySession,
    engine: Arc<RoomSyncEngine>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct P2pClient {
    ctx: Arc<PairlinkContext>,
    selector: RelayServerSelector,
    migrations: MigrationRunner,
    running: Mutex<Option<Running>>,
}

impl P2pClient {
    pub fn new(ctx: Arc<PairlinkContext>) -> Self {
        Self {
            selector: RelayServerSelector::new(ctx.config.probe_timeout()),
            migrations: MigrationRunner::with_defaults(ctx.persisted.clone(), default_relay_nodes()),
            running: Mutex::new(None),
            ctx,
        }
    }

    pub fn context(&self) -> &Arc<PairlinkContext> {
        &self.ctx
    }

    pub async fn state(&self) -> ConnectionState {
        self.ctx.store.state().await
    }

    /// Migrate, pick a relay server, log in and start syncing.
    pub async fn start(&self) -> Result<RelaySession, ClientError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ClientError::AlreadyStarted);
        }

        let target = MigrationTarget::RelayServer {
            nodes: self.ctx.config.relay_nodes.clone(),
        };
        self.migrations.migrate(&target).await?;
        self.migrations.record_sdk_version().await?;

        let server = self.relay_server().await?;
        let credentials = LoginCredentials::new(&self.ctx.key_pair, SystemTime::now());
        let session = self.ctx.relay.login(&server, &credentials).await?;
        info!(user = %session.user_id, relay = %server, "logged in");

        let engine = Arc::new(
            RoomSyncEngine::new(
                self.ctx.relay.clone(),
                self.ctx.store.clone(),
                self.ctx.persisted.clone(),
                SyncSettings::from(&self.ctx.config.sync),
            )
            .await?,
        );
        let cancel = CancellationToken::new();

        let inbound = engine.subscribe(EventFilter::All);
        let dispatcher = tokio::spawn(dispatch_inbound(
            self.ctx.clone(),
            session.clone(),
            inbound,
            cancel.clone(),
        ));
        let sync = engine.spawn(session.clone(), cancel.clone());

        *running = Some(Running {
            session: session.clone(),
            engine,
            cancel,
            tasks: vec![sync, dispatcher],
        });
        Ok(session)
    }

    /// The stored relay server while it is still configured, else a fresh selection.
    async fn relay_server(&self) -> Result<String, ClientError> {
        let nodes = &self.ctx.config.relay_nodes;

        if let Some(stored) = self.ctx.persisted.relay_server().await? {
            if nodes.contains(&stored) {
                debug!(relay = %stored, "reusing relay server");
                self.ctx
                    .store
                    .intent(ConnectionAction::OnRelayServerSelected(stored.clone()))
                    .await?;
                return Ok(stored);
            }
            warn!(relay = %stored, "stored relay server is no longer configured");
        }

        let nonce = self
            .ctx
            .config
            .relay_nonce()
            .map_err(|e| ClientError::Config(e.to_string()))?;
        let hash = generic_hash(&self.ctx.key_pair.public_key());
        let server = self
            .selector
            .select(self.ctx.relay.as_ref(), nodes, &hash, &nonce)
            .await?;
        self.ctx
            .store
            .intent(ConnectionAction::OnRelayServerSelected(server.clone()))
            .await?;
        Ok(server)
    }

    async fn running(&self) -> Result<(RelaySession, Arc<RoomSyncEngine>), ClientError> {
        let running = self.running.lock().await;
        let running = running.as_ref().ok_or(ClientError::NotStarted)?;
        Ok((running.session.clone(), running.engine.clone()))
    }

    pub async fn sync_phase(&self) -> Result<tokio::sync::watch::Receiver<SyncPhase>, ClientError> {
        let (_, engine) = self.running().await?;
        Ok(engine.phase())
    }

    /// Identity to hand to a peer out of band (QR code, deep link).
    pub async fn pairing_request(&self) -> Result<PeerIdentity, ClientError> {
        let (session, _) = self.running().await?;
        let metadata = self.ctx.communicator.metadata();
        Ok(PeerIdentity {
            id: Uuid::new_v4().to_string(),
            name: metadata.name.clone(),
            public_key: self.ctx.key_pair.public_key_hex(),
            relay_server: session.server,
            version: PAIRING_VERSION.into(),
            icon: metadata.icon.clone(),
            app_url: metadata.app_url.clone(),
            paired: false,
        })
    }

    /// Wait for a peer to answer our pairing request.
    pub async fn request_pairing(&self, timeout: Option<Duration>) -> Result<PeerIdentity, ClientError> {
        self.ctx.store.intent(ConnectionAction::OnPairingRequested).await?;
        let pending = self
            .ctx
            .store
            .state()
            .await
            .pending_pairing
            .ok_or(PairingError::Cancelled)?;

        let timeout = timeout.unwrap_or_else(|| self.ctx.config.pairing_timeout());
        let result = match tokio::time::timeout(timeout, pending.wait()).await {
            Ok(result) => result,
            Err(_) => Err(PairingError::TimedOut),
        };

        match result {
            Ok(peer) => Ok(peer),
            Err(e) => {
                debug!("pairing not completed: {}", e);
                self.ctx.store.intent(ConnectionAction::DiscardPairingData).await?;
                Err(e.into())
            }
        }
    }

    /// Answer a pairing request: open a channel and announce ourselves in it.
    pub async fn respond_to_pairing(&self, peer: &PeerIdentity) -> Result<ChannelId, ClientError> {
        let (session, engine) = self.running().await?;
        let channel_id = self.create_channel(&session, &engine, peer).await?;

        let message = self
            .ctx
            .communicator
            .channel_open_message(peer, &session.server)?;
        self.ctx.relay.send_event(&session, &channel_id, &message).await?;

        self.ctx
            .store
            .intent(ConnectionAction::OnChannelCreated {
                peer_id: peer.peer_id(),
                channel_id: channel_id.clone(),
            })
            .await?;
        info!(peer = %peer.peer_id(), channel = %channel_id, "pairing response sent");
        Ok(channel_id)
    }

    /// Create a room with `peer` and wait until the peer joins it.
    async fn create_channel(
        &self,
        session: &RelaySession,
        engine: &RoomSyncEngine,
        peer: &PeerIdentity,
    ) -> Result<ChannelId, ClientError> {
        let recipient = self
            .ctx
            .communicator
            .recipient_identifier(&peer.public_key, &peer.relay_server)?;
        let mut events = engine.subscribe(EventFilter::Sender(recipient.hash().to_string()));

        let room_id = self
            .ctx
            .relay
            .create_room(session, &[recipient.to_string()])
            .await?;
        debug!(room = %room_id, peer = %recipient, "channel room created");

        let joined = async {
            if engine.room(&room_id).is_some_and(|r| r.has_member(&recipient.to_string())) {
                return true;
            }
            while let Some(event) = events.recv().await {
                if let RelayEvent::Join { room_id: joined, .. } = &event {
                    if *joined == room_id {
                        return true;
                    }
                }
            }
            false
        };
        let joined = tokio::time::timeout(self.ctx.config.join_timeout(), joined).await;

        match joined {
            Ok(true) => Ok(room_id),
            _ => Err(ClientError::JoinTimedOut { room_id }),
        }
    }

    /// Encrypt `message` for `peer` and post it to the peer's channel.
    pub async fn send(&self, peer: &PeerIdentity, message: &[u8]) -> Result<(), ClientError> {
        let (session, engine) = self.running().await?;
        let peer_id = peer.peer_id();

        let active = self.ctx.store.state().await.active_channel(&peer_id).cloned();
        let channel_id = match active {
            Some(channel_id) => channel_id,
            None => {
                let channel_id = self.create_channel(&session, &engine, peer).await?;
                self.ctx
                    .store
                    .intent(ConnectionAction::OnChannelCreated {
                        peer_id: peer_id.clone(),
                        channel_id: channel_id.clone(),
                    })
                    .await?;
                channel_id
            }
        };

        let body = self.ctx.channel.encrypt(&peer.public_key, message)?;
        self.ctx.relay.send_event(&session, &channel_id, &body).await?;
        debug!(peer = %peer_id, channel = %channel_id, bytes = message.len(), "message sent");
        Ok(())
    }

    /// Stream of decrypted messages from `peer`.
    pub async fn subscribe(&self, peer: &PeerIdentity) -> Result<mpsc::Receiver<InboundMessage>, ClientError> {
        let (_, engine) = self.running().await?;
        let mut events = engine.subscribe(EventFilter::All);
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let ctx = self.ctx.clone();
        let peer = peer.clone();

        tokio::spawn(async move {
            let peer_id = peer.peer_id();
            while let Some(event) = events.recv().await {
                let RelayEvent::TextMessage { room_id, body, .. } = &event else {
                    continue;
                };
                if !ctx.communicator.is_message_from(&event, &peer.public_key) || is_channel_open(body) {
                    continue;
                }
                if !EncryptedChannel::is_valid(body) {
                    debug!(peer = %peer_id, room = %room_id, "ignoring message that is not a ciphertext");
                    continue;
                }

                if let Err(e) = ctx
                    .store
                    .intent(ConnectionAction::OnChannelEvent {
                        peer_id: peer_id.clone(),
                        channel_id: room_id.clone(),
                    })
                    .await
                {
                    warn!("failed to record channel activity: {}", e);
                }

                let payload = match ctx.channel.decrypt(&peer.public_key, body) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(peer = %peer_id, room = %room_id, "dropping message: {}", e);
                        continue;
                    }
                };
                let message = InboundMessage {
                    peer_id: peer_id.clone(),
                    channel_id: room_id.clone(),
                    payload,
                };
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            debug!(peer = %peer_id, "peer subscription closed");
        });

        Ok(rx)
    }

    /// Forget a peer: close its channel and drop its session keys.
    pub async fn remove_peer(&self, peer: &PeerIdentity) -> Result<(), ClientError> {
        let peer_id = peer.peer_id();
        let channel = self.ctx.store.state().await.active_channel(&peer_id).cloned();
        if let Some(channel_id) = channel {
            self.ctx
                .store
                .intent(ConnectionAction::OnChannelClosed(channel_id))
                .await?;
        }
        self.ctx.channel.forget(&peer.public_key);
        info!(peer = %peer_id, "peer removed");
        Ok(())
    }

    /// Stop syncing and wipe connection state.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let running = self.running.lock().await.take();
        if let Some(running) = running {
            running.cancel.cancel();
            for task in running.tasks {
                if let Err(e) = task.await {
                    warn!("client task ended abnormally: {}", e);
                }
            }
        }
        self.ctx.store.intent(ConnectionAction::HardReset).await?;
        info!("disconnected");
        Ok(())
    }
}

/// Handle relay events on behalf of the whole client: join rooms we are
/// invited to, complete pairings announced in them and track closed channels.
async fn dispatch_inbound(
    ctx: Arc<PairlinkContext>,
    session: RelaySession,
    mut events: EventSubscription,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            RelayEvent::Invite { room_id, sender } => {
                debug!(room = %room_id, inviter = ?sender, "joining invited room");
                if let Err(e) = ctx.relay.join_room(&session, &room_id).await {
                    warn!(room = %room_id, "failed to join room: {}", e);
                }
            }

            RelayEvent::TextMessage { room_id, sender, body }
                if is_channel_open(&body) && sender != session.user_id =>
            {
                match ctx.communicator.open_channel_message(&sender, &body) {
                    Ok(peer) => {
                        let peer = peer.paired();
                        let actions = [
                            ConnectionAction::OnChannelCreated {
                                peer_id: peer.peer_id(),
                                channel_id: room_id,
                            },
                            ConnectionAction::OnPairingCompleted(peer),
                        ];
                        for action in actions {
                            if let Err(e) = ctx.store.intent(action).await {
                                warn!("failed to record pairing: {}", e);
                            }
                        }
                    }
                    Err(PairingError::WrongRecipient) => {
                        debug!(room = %room_id, "channel-open for another recipient")
                    }
                    Err(e) => warn!(room = %room_id, "dropping channel-open message: {}", e),
                }
            }

            RelayEvent::Leave { room_id, user_id } if user_id != session.user_id => {
                if ctx.store.state().await.peer_for_channel(&room_id).is_some() {
                    if let Err(e) = ctx
                        .store
                        .intent(ConnectionAction::OnChannelClosed(room_id))
                        .await
                    {
                        warn!("failed to close channel: {}", e);
                    }
                }
            }

            _ => {}
        }
    }
    debug!("inbound dispatcher stopped");
}
