//! WebSocket support for the live chat engine
//!
//! Everything real-time lives here: customers and support agents connect
//! over one WebSocket endpoint, announce an identity, and exchange chat
//! messages that are deduplicated, persisted, and fanned out to every
//! connection that should see them.
//!
//! # Architecture
//!
//! - **Connection**: a live socket and the identity registered behind it
//! - **State**: the connection registry, rooms, and lifecycle cache
//! - **Room**: per-chat membership for message fan-out
//! - **Presence**: online/offline resyncs derived from the registry
//! - **Lifecycle**: the Active -> Terminated state machine
//! - **Router**: the dedup/persist/fan-out pipeline
//! - **Handler**: the Axum WebSocket endpoint and event dispatch
//! - **Events**: type-safe client/server wire events

pub mod connection;
pub mod events;
pub mod handler;
pub mod lifecycle;
pub mod presence;
pub mod room;
pub mod router;
pub mod state;

pub use handler::ws_handler;
pub use state::ChatState;
