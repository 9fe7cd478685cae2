//! Wire-level types for pairlink: peer identities, rendezvous identifiers,
//! versioned pairing payloads, the channel-open envelope and the relay sync
//! deltas with the rooms and events decoded from them.

pub mod codec;
pub mod error;
pub mod identifier;
pub mod pairing;
pub mod sync;
pub mod types;

pub use error::ProtocolError;
pub use identifier::RendezvousIdentifier;
pub use pairing::{PairingPayload, PairingResponse, PayloadVersion};
pub use sync::{RelayEvent, RelayRoom, RoomStatus, SyncResponse};
pub use types::{AppMetadata, ChannelId, PeerId, PeerIdentity};
