//! Realtime chat core
//!
//! - **Presence**: registry of live connections, staff activity checks
//! - **Room**: conversation membership, lifecycle and ordered fan-out
//! - **Broadcast**: message validation, persistence and offline-staff notifications
//! - **Hub**: maps inbound events to effects, independent of the transport
//! - **Handler**: Axum websocket route moving frames to and from the hub
//! - **Events**: wire format of client and server events

pub mod access;
pub mod broadcast;
pub mod connection;
pub mod error;
pub mod events;
pub mod handler;
pub mod hub;
pub mod locks;
pub mod presence;
pub mod room;

pub use access::AccessPolicy;
pub use broadcast::MessageBroadcaster;
pub use connection::Connection;
pub use error::{ChatError, ChatResult};
pub use events::{ClientEvent, ParticipantView, ServerEvent};
pub use handler::ws_handler;
pub use hub::{AssistantResponder, ChatHub};
pub use presence::{PresenceRegistry, PresenceStats};
pub use room::RoomManager;
