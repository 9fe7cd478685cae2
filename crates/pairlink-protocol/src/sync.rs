//! Relay sync deltas and the room/event values decoded from them.
//!
//! Wire structures mirror the relay network's long-poll response. Events
//! inside a room keep the server's order. Across rooms there is no server
//! order: decoded events come grouped as joined, invited, then left rooms,
//! each group sorted by room id.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

pub const EVENT_CREATE: &str = "m.room.create";
pub const EVENT_MEMBER: &str = "m.room.member";
pub const EVENT_MESSAGE: &str = "m.room.message";
pub const MSGTYPE_TEXT: &str = "m.text";

const MEMBERSHIP_JOIN: &str = "join";
const MEMBERSHIP_LEAVE: &str = "leave";
const MEMBERSHIP_INVITE: &str = "invite";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub next_batch: String,
    #[serde(default)]
    pub rooms: RoomsDelta,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomsDelta {
    #[serde(default)]
    pub join: BTreeMap<String, JoinedRoomDelta>,
    #[serde(default)]
    pub invite: BTreeMap<String, InvitedRoomDelta>,
    #[serde(default)]
    pub leave: BTreeMap<String, LeftRoomDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch {
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedRoomDelta {
    #[serde(default)]
    pub state: EventBatch,
    #[serde(default)]
    pub timeline: EventBatch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitedRoomDelta {
    #[serde(default)]
    pub invite_state: EventBatch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeftRoomDelta {
    #[serde(default)]
    pub state: EventBatch,
    #[serde(default)]
    pub timeline: EventBatch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: String,
    #[serde(default)]
    pub state_key: Option<String>,
    #[serde(default)]
    pub content: RawContent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawContent {
    #[serde(default)]
    pub membership: Option<String>,
    #[serde(default)]
    pub msgtype: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub creator: Option<String>,
}

impl RawEvent {
    fn membership(&self) -> Option<&str> {
        if self.kind != EVENT_MEMBER {
            return None;
        }
        self.content.membership.as_deref()
    }

    /// User a membership event is about: the state key, falling back to the sender.
    fn member(&self) -> &str {
        self.state_key.as_deref().unwrap_or(&self.sender)
    }
}

/// Lifecycle state of a relay room as seen from this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomStatus {
    Joined,
    Invited,
    Left,
    Unknown,
}

/// A relay room with every member observed so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRoom {
    pub id: String,
    pub status: RoomStatus,
    pub members: BTreeSet<String>,
}

impl RelayRoom {
    pub fn new(id: impl Into<String>, status: RoomStatus) -> Self {
        Self {
            id: id.into(),
            status,
            members: BTreeSet::new(),
        }
    }

    /// Build a room from the events of one sync delta.
    pub fn from_sync(id: &str, status: RoomStatus, events: &[RawEvent]) -> Self {
        let members = events
            .iter()
            .filter(|e| e.membership() == Some(MEMBERSHIP_JOIN))
            .map(|e| e.member().to_string())
            .collect();
        Self {
            id: id.to_string(),
            status,
            members,
        }
    }

    /// Merge a newer observation into this room, returning the result.
    ///
    /// Membership is a union; the status follows the newer observation
    /// unless it carries no information (`Unknown`).
    pub fn update(&self, newer: &RelayRoom) -> RelayRoom {
        let status = match newer.status {
            RoomStatus::Unknown => self.status,
            status => status,
        };
        let members = self.members.union(&newer.members).cloned().collect();
        RelayRoom {
            id: self.id.clone(),
            status,
            members,
        }
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.members.contains(user_id)
    }
}

/// Events decoded from one sync response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Create { room_id: String, creator: String },
    Invite { room_id: String, sender: Option<String> },
    Join { room_id: String, user_id: String },
    Leave { room_id: String, user_id: String },
    TextMessage { room_id: String, sender: String, body: String },
}

impl RelayEvent {
    pub fn room_id(&self) -> &str {
        match self {
            Self::Create { room_id, .. }
            | Self::Invite { room_id, .. }
            | Self::Join { room_id, .. }
            | Self::Leave { room_id, .. }
            | Self::TextMessage { room_id, .. } => room_id,
        }
    }

    /// The relay user that caused this event, if known.
    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::Create { creator, .. } => Some(creator.as_str()),
            Self::Invite { sender, .. } => sender.as_deref(),
            Self::Join { user_id, .. } | Self::Leave { user_id, .. } => Some(user_id.as_str()),
            Self::TextMessage { sender, .. } => Some(sender.as_str()),
        }
    }

    fn from_raw(room_id: &str, raw: &RawEvent) -> Option<Self> {
        match raw.kind.as_str() {
            EVENT_CREATE => Some(Self::Create {
                room_id: room_id.to_string(),
                creator: raw.content.creator.clone().unwrap_or_else(|| raw.sender.clone()),
            }),
            EVENT_MEMBER => match raw.membership()? {
                MEMBERSHIP_JOIN => Some(Self::Join {
                    room_id: room_id.to_string(),
                    user_id: raw.member().to_string(),
                }),
                MEMBERSHIP_LEAVE => Some(Self::Leave {
                    room_id: room_id.to_string(),
                    user_id: raw.member().to_string(),
                }),
                _ => None,
            },
            EVENT_MESSAGE if raw.content.msgtype.as_deref() == Some(MSGTYPE_TEXT) => {
                Some(Self::TextMessage {
                    room_id: room_id.to_string(),
                    sender: raw.sender.clone(),
                    body: raw.content.body.clone()?,
                })
            }
            _ => None,
        }
    }
}

impl SyncResponse {
    /// Room observations carried by this response.
    pub fn rooms(&self) -> Vec<RelayRoom> {
        let joined = self.rooms.join.iter().map(|(id, delta)| {
            let events: Vec<RawEvent> = delta
                .state
                .events
                .iter()
                .chain(&delta.timeline.events)
                .cloned()
                .collect();
            RelayRoom::from_sync(id, RoomStatus::Joined, &events)
        });
        let invited = self
            .rooms
            .invite
            .iter()
            .map(|(id, delta)| RelayRoom::from_sync(id, RoomStatus::Invited, &delta.invite_state.events));
        let left = self.rooms.leave.iter().map(|(id, delta)| {
            let events: Vec<RawEvent> = delta
                .state
                .events
                .iter()
                .chain(&delta.timeline.events)
                .cloned()
                .collect();
            RelayRoom::from_sync(id, RoomStatus::Left, &events)
        });
        joined.chain(invited).chain(left).collect()
    }

    /// Decode the response into events, keeping server order within each room.
    pub fn events(&self) -> Vec<RelayEvent> {
        let mut events = Vec::new();

        for (room_id, delta) in &self.rooms.join {
            events.extend(
                delta
                    .state
                    .events
                    .iter()
                    .chain(&delta.timeline.events)
                    .filter_map(|raw| RelayEvent::from_raw(room_id, raw)),
            );
        }

        for (room_id, delta) in &self.rooms.invite {
            let inviter = delta
                .invite_state
                .events
                .iter()
                .find(|e| e.membership() == Some(MEMBERSHIP_INVITE))
                .map(|e| e.sender.clone());
            events.push(RelayEvent::Invite {
                room_id: room_id.clone(),
                sender: inviter,
            });
        }

        for (room_id, delta) in &self.rooms.leave {
            events.extend(
                delta
                    .state
                    .events
                    .iter()
                    .chain(&delta.timeline.events)
                    .filter_map(|raw| RelayEvent::from_raw(room_id, raw)),
            );
        }

        events
    }
}
