//! Global WebSocket state management
//!
//! Maintains the registry of active connections, the chat rooms, and the
//! shared termination cache.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use livedesk_shared::Role;

use super::connection::{Connection, Participant};
use super::lifecycle::SessionLifecycle;
use super::room::RoomManager;

/// Global chat state shared across all connections
#[derive(Clone)]
pub struct ChatState {
    /// All registered participants indexed by connection_id
    pub connections: Arc<RwLock<HashMap<Uuid, Participant>>>,

    /// Room manager for per-chat fan-out
    pub rooms: Arc<RoomManager>,

    /// Terminated-chat cache backed by the store
    pub lifecycle: Arc<SessionLifecycle>,
}

impl ChatState {
    /// Create new chat state
    pub fn new() -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RoomManager::new()),
            lifecycle: Arc::new(SessionLifecycle::new()),
        }
    }

    /// Register (or re-register) the identity behind a connection
    ///
    /// Re-registering the same connection is idempotent; the identity is
    /// simply overwritten, so repeated register events after client retries
    /// never produce ghost entries.
    pub async fn register(
        &self,
        conn: Arc<Connection>,
        role: Role,
        participant_id: &str,
        display_name: &str,
    ) {
        let mut connections = self.connections.write().await;
        let connection_id = conn.connection_id;
        connections.insert(
            connection_id,
            Participant::new(role, participant_id, display_name, conn),
        );

        tracing::info!(
            connection_id = %connection_id,
            role = %role,
            participant_id = %participant_id,
            total_connections = connections.len(),
            "WebSocket participant registered"
        );
    }

    /// Remove a connection and drop it from all rooms
    pub async fn unregister(&self, connection_id: &Uuid) -> Option<Participant> {
        // Release the registry lock before touching the rooms lock
        let (participant, remaining) = {
            let mut connections = self.connections.write().await;
            let participant = connections.remove(connection_id);
            (participant, connections.len())
        };

        if let Some(ref p) = participant {
            self.rooms.remove_connection(connection_id).await;

            tracing::info!(
                connection_id = %connection_id,
                role = %p.role,
                participant_id = %p.participant_id,
                remaining_connections = remaining,
                "WebSocket participant removed"
            );
        }

        participant
    }

    /// Get the registered participant behind a connection, if any
    pub async fn get_participant(&self, connection_id: &Uuid) -> Option<Participant> {
        let connections = self.connections.read().await;
        connections.get(connection_id).cloned()
    }

    /// Get all registered participants with a given role
    pub async fn participants_by_role(&self, role: Role) -> Vec<Participant> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|p| p.role == role)
            .cloned()
            .collect()
    }

    /// Get every live connection a participant currently has open
    ///
    /// A participant may be connected more than once (multiple tabs or
    /// devices); the result carries zero or more connections.
    pub async fn resolve(&self, participant_id: &str) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|p| p.participant_id == participant_id)
            .map(|p| Arc::clone(&p.conn))
            .collect()
    }

    /// Whether a participant has at least one live connection
    pub async fn is_participant_online(&self, participant_id: &str) -> bool {
        let connections = self.connections.read().await;
        connections
            .values()
            .any(|p| p.participant_id == participant_id)
    }

    /// Get total number of registered connections
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}
