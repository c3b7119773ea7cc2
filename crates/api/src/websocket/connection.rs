//! WebSocket connection management
//!
//! Represents an active WebSocket connection and the registered identity
//! behind it. A connection exists as soon as the socket upgrades; the
//! identity only arrives with the first register or join event.

use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use livedesk_shared::Role;

use super::events::ServerEvent;

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique ID for this connection
    pub connection_id: Uuid,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,
}

impl Connection {
    /// Create a new connection
    pub fn new(sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            sender,
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if sent successfully, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }
}

/// A connection together with its registered identity
#[derive(Debug, Clone)]
pub struct Participant {
    pub role: Role,
    pub participant_id: String,
    pub display_name: String,
    pub conn: Arc<Connection>,
}

impl Participant {
    pub fn new(
        role: Role,
        participant_id: impl Into<String>,
        display_name: impl Into<String>,
        conn: Arc<Connection>,
    ) -> Self {
        Self {
            role,
            participant_id: participant_id.into(),
            display_name: display_name.into(),
            conn,
        }
    }
}
