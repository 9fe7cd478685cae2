//! Long-poll synchronization with the relay server.
//!
//! One engine per client. [`RoomSyncEngine::run`] repeatedly calls the relay
//! sync endpoint, folds room deltas into a snapshot and publishes decoded
//! events to subscribers. Failures are retried with exponential backoff and
//! surfaced to the connection store once the retry budget is spent.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pairlink_protocol::{ChannelId, RelayEvent, RelayRoom, RendezvousIdentifier, RoomStatus};

use crate::config::SyncConfig;
use crate::relay::{RelayApi, RelayError, RelaySession, SyncRequest};
use crate::storage::{PersistedState, StorageError};
use crate::store::{ConnectionAction, ConnectionStore};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Syncing,
    BackingOff,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_timeout: Duration,
    pub retry_budget: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
            retry_budget: config.retry_budget,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
        }
    }
}

impl SyncSettings {
    /// Delay before retry number `failures` (1-based).
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Room(String),
    /// Events whose sender is the owner of this public-key hash.
    Sender(String),
}

impl EventFilter {
    pub fn matches(&self, event: &RelayEvent) -> bool {
        match self {
            Self::All => true,
            Self::Room(room_id) => event.room_id() == room_id,
            Self::Sender(hash) => event
                .sender()
                .and_then(|s| RendezvousIdentifier::parse(s).ok())
                .is_some_and(|id| id.matches_hash(hash)),
        }
    }
}

pub struct EventSubscription {
    rx: broadcast::Receiver<RelayEvent>,
    filter: EventFilter,
}

impl EventSubscription {
    /// Next matching event, or `None` once the engine is gone.
    pub async fn recv(&mut self) -> Option<RelayEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagging, skipping events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

pub struct RoomSyncEngine {
    relay: Arc<dyn RelayApi>,
    store: Arc<ConnectionStore>,
    persisted: PersistedState,
    settings: SyncSettings,
    token: Mutex<Option<String>>,
    rooms: RwLock<Arc<HashMap<String, RelayRoom>>>,
    events: broadcast::Sender<RelayEvent>,
    phase: watch::Sender<SyncPhase>,
}

impl RoomSyncEngine {
    /// Create an engine, restoring the persisted sync token and rooms.
    pub async fn new(
        relay: Arc<dyn RelayApi>,
        store: Arc<ConnectionStore>,
        persisted: PersistedState,
        settings: SyncSettings,
    ) -> Result<Self, StorageError> {
        let token = persisted.sync_token().await?;
        let rooms: HashMap<String, RelayRoom> = persisted
            .rooms()
            .await?
            .into_iter()
            .map(|room| (room.id.clone(), room))
            .collect();
        debug!(rooms = rooms.len(), has_token = token.is_some(), "sync state restored");

        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Ok(Self {
            relay,
            store,
            persisted,
            settings,
            token: Mutex::new(token),
            rooms: RwLock::new(Arc::new(rooms)),
            events,
            phase,
        })
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        EventSubscription {
            rx: self.events.subscribe(),
            filter,
        }
    }

    pub fn phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Snapshot of every known room.
    pub fn rooms(&self) -> Arc<HashMap<String, RelayRoom>> {
        match self.rooms.read() {
            Ok(rooms) => rooms.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn room(&self, room_id: &str) -> Option<RelayRoom> {
        self.rooms().get(room_id).cloned()
    }

    pub async fn sync_token(&self) -> Option<String> {
        self.token.lock().await.clone()
    }

    /// Run a single sync cycle and return the events it produced.
    pub async fn sync_once(&self, session: &RelaySession) -> Result<Vec<RelayEvent>, RelayError> {
        self.phase.send_replace(SyncPhase::Syncing);

        let request = SyncRequest {
            since: self.token.lock().await.clone(),
            timeout: self.settings.poll_timeout,
        };
        let response = match self.relay.sync(session, &request).await {
            Ok(response) => response,
            Err(e) => {
                self.phase.send_replace(SyncPhase::Idle);
                return Err(e);
            }
        };

        *self.token.lock().await = Some(response.next_batch.clone());
        if let Err(e) = self.persisted.set_sync_token(&response.next_batch).await {
            warn!("failed to persist sync token: {}", e);
        }

        let observed = response.rooms();
        if !observed.is_empty() {
            let channels: HashSet<ChannelId> = self
                .store
                .state()
                .await
                .active_channels
                .into_values()
                .collect();
            let snapshot = self.fold_rooms(observed, &channels);
            let rooms: Vec<RelayRoom> = snapshot.values().cloned().collect();
            if let Err(e) = self.persisted.set_rooms(&rooms).await {
                warn!("failed to persist rooms: {}", e);
            }
        }

        let events = response.events();
        for event in &events {
            // no subscribers is fine
            let _ = self.events.send(event.clone());
        }

        self.phase.send_replace(SyncPhase::Idle);
        Ok(events)
    }

    /// Merge `observed` into the snapshot. Left rooms are dropped unless an
    /// active channel still points at them.
    fn fold_rooms(
        &self,
        observed: Vec<RelayRoom>,
        channels: &HashSet<ChannelId>,
    ) -> Arc<HashMap<String, RelayRoom>> {
        let mut guard = match self.rooms.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = HashMap::clone(&guard);
        for room in observed {
            let merged = match next.get(&room.id) {
                Some(known) => known.update(&room),
                None => room,
            };
            next.insert(merged.id.clone(), merged);
        }
        next.retain(|id, room| room.status != RoomStatus::Left || channels.contains(id));
        let next = Arc::new(next);
        *guard = next.clone();
        next
    }

    /// Sync until `cancel` fires.
    pub async fn run(self: Arc<Self>, session: RelaySession, cancel: CancellationToken) {
        info!(user = %session.user_id, server = %session.server, "sync loop started");
        let mut failures = 0u32;
        let mut surfaced = false;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.sync_once(&session) => result,
            };

            let delay = match result {
                Ok(events) => {
                    failures = 0;
                    if surfaced {
                        surfaced = false;
                        self.dispatch(ConnectionAction::OnSyncSuccess).await;
                    }
                    if !events.is_empty() {
                        debug!(events = events.len(), "sync cycle delivered events");
                    }
                    continue;
                }
                Err(e) => {
                    failures += 1;
                    if e.is_transient() && failures <= self.settings.retry_budget {
                        let delay = self.settings.backoff_delay(failures);
                        warn!(attempt = failures, delay_ms = delay.as_millis() as u64, "sync failed: {}", e);
                        delay
                    } else {
                        error!(attempts = failures, "sync failing: {}", e);
                        self.dispatch(ConnectionAction::OnSyncError(e.to_string())).await;
                        surfaced = true;
                        failures = 0;
                        self.settings.backoff_max
                    }
                }
            };

            self.phase.send_replace(SyncPhase::BackingOff);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            self.phase.send_replace(SyncPhase::Idle);
        }

        self.phase.send_replace(SyncPhase::Idle);
        info!("sync loop stopped");
    }

    pub fn spawn(self: &Arc<Self>, session: RelaySession, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.clone().run(session, cancel))
    }

    async fn dispatch(&self, action: ConnectionAction) {
        if let Err(e) = self.store.intent(action).await {
            warn!("failed to update connection state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use pairlink_crypto::LoginCredentials;
    use pairlink_protocol::sync::{EventBatch, JoinedRoomDelta, LeftRoomDelta, RawContent, RawEvent};
    use pairlink_protocol::SyncResponse;

    use crate::relay::NodeProbe;

    use super::*;

    /// Relay that replays scripted sync results, then hangs.
    #[derive(Default)]
    struct ScriptedRelay {
        script: StdMutex<VecDeque<Result<SyncResponse, RelayError>>>,
        seen_tokens: StdMutex<Vec<Option<String>>>,
    }

    impl ScriptedRelay {
        fn new(script: Vec<Result<SyncResponse, RelayError>>) -> Self {
            Self {
                script: StdMutex::new(script.into()),
                seen_tokens: StdMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen_tokens.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NodeProbe for ScriptedRelay {
        async fn is_up(&self, _node: &str) -> bool {
            true
        }
    }

    #[async_trait]
    impl RelayApi for ScriptedRelay {
        async fn login(&self, _: &str, _: &LoginCredentials) -> Result<RelaySession, RelayError> {
            Ok(session())
        }

        async fn sync(&self, _: &RelaySession, request: &SyncRequest) -> Result<SyncResponse, RelayError> {
            self.seen_tokens.lock().unwrap().push(request.since.clone());
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }

        async fn create_room(&self, _: &RelaySession, _: &[String]) -> Result<String, RelayError> {
            Ok("!room:relay".into())
        }

        async fn invite(&self, _: &RelaySession, _: &str, _: &str) -> Result<(), RelayError> {
            Ok(())
        }

        async fn join_room(&self, _: &RelaySession, _: &str) -> Result<(), RelayError> {
            Ok(())
        }

        async fn send_event(&self, _: &RelaySession, _: &str, _: &str) -> Result<(), RelayError> {
            Ok(())
        }
    }

    fn session() -> RelaySession {
        RelaySession {
            server: "relay.example.org".into(),
            user_id: "@aa:relay.example.org".into(),
            access_token: "token".into(),
        }
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            poll_timeout: Duration::from_secs(30),
            retry_budget: 2,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(5),
        }
    }

    fn text(sender: &str, body: &str) -> RawEvent {
        RawEvent {
            kind: "m.room.message".into(),
            sender: sender.into(),
            state_key: None,
            content: RawContent {
                msgtype: Some("m.text".into()),
                body: Some(body.into()),
                ..Default::default()
            },
        }
    }

    fn join(user: &str) -> RawEvent {
        RawEvent {
            kind: "m.room.member".into(),
            sender: user.into(),
            state_key: Some(user.into()),
            content: RawContent {
                membership: Some("join".into()),
                ..Default::default()
            },
        }
    }

    fn response(batch: &str, room: &str, events: Vec<RawEvent>) -> SyncResponse {
        let mut response = SyncResponse {
            next_batch: batch.into(),
            ..Default::default()
        };
        response.rooms.join.insert(
            room.into(),
            JoinedRoomDelta {
                state: EventBatch::default(),
                timeline: EventBatch { events },
            },
        );
        response
    }

    async fn engine(relay: Arc<ScriptedRelay>) -> (Arc<RoomSyncEngine>, Arc<ConnectionStore>, PersistedState) {
        let persisted = PersistedState::in_memory();
        let store = Arc::new(ConnectionStore::load(persisted.clone()).await.unwrap());
        let engine = RoomSyncEngine::new(relay, store.clone(), persisted.clone(), settings())
            .await
            .unwrap();
        (Arc::new(engine), store, persisted)
    }

    #[test]
    fn backoff_grows_and_caps() {
        let s = settings();
        assert_eq!(s.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(s.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(s.backoff_delay(3), Duration::from_millis(400));
        assert_eq!(s.backoff_delay(10), Duration::from_secs(5));
        assert_eq!(s.backoff_delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn filters() {
        let event = RelayEvent::TextMessage {
            room_id: "!a".into(),
            sender: "@abcd:relay".into(),
            body: "x".into(),
        };
        assert!(EventFilter::All.matches(&event));
        assert!(EventFilter::Room("!a".into()).matches(&event));
        assert!(!EventFilter::Room("!b".into()).matches(&event));
        assert!(EventFilter::Sender("ABCD".into()).matches(&event));
        assert!(!EventFilter::Sender("ef01".into()).matches(&event));
    }

    #[tokio::test]
    async fn sync_once_folds_rooms_and_publishes_events() {
        let relay = Arc::new(ScriptedRelay::new(vec![Ok(response(
            "b1",
            "!room",
            vec![join("@peer:relay"), text("@peer:relay", "hello")],
        ))]));
        let (engine, _, persisted) = engine(relay.clone()).await;
        let mut sub = engine.subscribe(EventFilter::Room("!room".into()));

        let events = engine.sync_once(&session()).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(sub.recv().await, Some(RelayEvent::Join { .. })));
        assert!(matches!(sub.recv().await, Some(RelayEvent::TextMessage { .. })));

        assert!(engine.room("!room").unwrap().has_member("@peer:relay"));
        assert_eq!(engine.sync_token().await.as_deref(), Some("b1"));
        assert_eq!(persisted.sync_token().await.unwrap().as_deref(), Some("b1"));
        assert_eq!(persisted.rooms().await.unwrap().len(), 1);
        assert_eq!(*engine.phase().borrow(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn continuation_token_is_forwarded() {
        let relay = Arc::new(ScriptedRelay::new(vec![
            Ok(response("b1", "!room", vec![])),
            Ok(response("b2", "!room", vec![])),
        ]));
        let (engine, _, _) = engine(relay.clone()).await;
        engine.sync_once(&session()).await.unwrap();
        engine.sync_once(&session()).await.unwrap();

        let seen = relay.seen_tokens.lock().unwrap().clone();
        assert_eq!(seen, vec![None, Some("b1".to_string())]);
    }

    #[tokio::test]
    async fn restores_persisted_state() {
        let relay = Arc::new(ScriptedRelay::new(vec![Ok(response(
            "b7",
            "!room",
            vec![join("@peer:relay")],
        ))]));
        let (first, store, persisted) = engine(relay).await;
        first.sync_once(&session()).await.unwrap();

        let relay = Arc::new(ScriptedRelay::new(vec![]));
        let second = RoomSyncEngine::new(relay, store, persisted, settings()).await.unwrap();
        assert_eq!(second.sync_token().await.as_deref(), Some("b7"));
        assert!(second.room("!room").unwrap().has_member("@peer:relay"));
    }

    #[tokio::test]
    async fn rooms_accumulate_members_across_cycles() {
        let relay = Arc::new(ScriptedRelay::new(vec![
            Ok(response("b1", "!room", vec![join("@a:relay")])),
            Ok(response("b2", "!room", vec![join("@b:relay")])),
        ]));
        let (engine, _, _) = engine(relay).await;
        engine.sync_once(&session()).await.unwrap();
        engine.sync_once(&session()).await.unwrap();

        let room = engine.room("!room").unwrap();
        assert!(room.has_member("@a:relay"));
        assert!(room.has_member("@b:relay"));
    }

    fn left(batch: &str, room: &str) -> SyncResponse {
        let mut response = SyncResponse {
            next_batch: batch.into(),
            ..Default::default()
        };
        response.rooms.leave.insert(room.into(), LeftRoomDelta::default());
        response
    }

    #[tokio::test]
    async fn left_rooms_pruned_unless_channel_active() {
        let relay = Arc::new(ScriptedRelay::new(vec![
            Ok(response("b1", "!old", vec![join("@a:relay")])),
            Ok(response("b2", "!chan", vec![join("@b:relay")])),
            Ok(left("b3", "!old")),
            Ok(left("b4", "!chan")),
        ]));
        let (engine, store, persisted) = engine(relay).await;
        store
            .intent(ConnectionAction::OnChannelCreated {
                peer_id: "p1".into(),
                channel_id: "!chan".into(),
            })
            .await
            .unwrap();
        for _ in 0..4 {
            engine.sync_once(&session()).await.unwrap();
        }

        assert!(engine.room("!old").is_none());
        let kept = engine.room("!chan").unwrap();
        assert_eq!(kept.status, RoomStatus::Left);
        let stored: Vec<String> = persisted.rooms().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(stored, vec!["!chan".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_surface_after_budget_and_recover() {
        let transport = || -> Result<SyncResponse, RelayError> {
            Err(RelayError::Transport("connection reset".into()))
        };
        let relay = Arc::new(ScriptedRelay::new(vec![
            transport(),
            transport(),
            transport(),
            Ok(response("b1", "!room", vec![])),
        ]));
        let (engine, store, _) = engine(relay.clone()).await;
        let cancel = CancellationToken::new();
        let handle = engine.spawn(session(), cancel.clone());

        // two retries within budget: 100ms + 200ms, then surfaced
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(relay.calls(), 3);
        assert_eq!(store.state().await.sync_error.as_deref(), Some("transport error: connection reset"));
        assert_eq!(*engine.phase().borrow(), SyncPhase::BackingOff);

        // after the maximum delay the loop resumes and recovers
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(relay.calls(), 5);
        assert!(store.state().await.sync_error.is_none());

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(*engine.phase().borrow(), SyncPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_error_surfaces_immediately() {
        let relay = Arc::new(ScriptedRelay::new(vec![Err(RelayError::Forbidden(
            "invalid token".into(),
        ))]));
        let (engine, store, _) = engine(relay.clone()).await;
        let cancel = CancellationToken::new();
        let handle = engine.spawn(session(), cancel.clone());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(relay.calls(), 1);
        assert!(store.state().await.sync_error.unwrap().contains("invalid token"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
