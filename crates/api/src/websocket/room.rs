//! Chat room management
//!
//! Tracks which connections are watching each chat so messages can be
//! fanned out to everyone with the conversation open.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;

/// Manages chat rooms keyed by chat ID (the customer's ID)
pub struct RoomManager {
    /// Map of chat_id -> list of connections
    rooms: Arc<RwLock<HashMap<String, Vec<Arc<Connection>>>>>,
}

impl RoomManager {
    /// Create a new room manager
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Add a connection to a chat room
    ///
    /// Joining a room the connection is already in is a no-op, so clients
    /// may re-send join events after reconnect races without duplicating
    /// themselves in the fan-out list.
    pub async fn join(&self, chat_id: &str, conn: Arc<Connection>) {
        let mut rooms = self.rooms.write().await;
        let conns = rooms.entry(chat_id.to_string()).or_insert_with(Vec::new);

        if !conns.iter().any(|c| c.connection_id == conn.connection_id) {
            conns.push(Arc::clone(&conn));
        }

        tracing::debug!(
            chat_id = %chat_id,
            connection_id = %conn.connection_id,
            room_size = conns.len(),
            "Connection joined chat room"
        );
    }

    /// Get a snapshot of all connections in a chat room
    pub async fn members(&self, chat_id: &str) -> Vec<Arc<Connection>> {
        let rooms = self.rooms.read().await;
        rooms.get(chat_id).cloned().unwrap_or_default()
    }

    /// Remove a connection from all rooms
    pub async fn remove_connection(&self, connection_id: &Uuid) {
        let mut rooms = self.rooms.write().await;
        let mut removed_from = Vec::new();

        for (chat_id, conns) in rooms.iter_mut() {
            let before_len = conns.len();
            conns.retain(|c| c.connection_id != *connection_id);
            if conns.len() < before_len {
                removed_from.push(chat_id.clone());
            }
        }

        // Clean up empty rooms
        rooms.retain(|_, conns| !conns.is_empty());

        if !removed_from.is_empty() {
            tracing::debug!(
                connection_id = %connection_id,
                room_count = removed_from.len(),
                "Removed connection from rooms"
            );
        }
    }

    /// Get room size (number of connections) for a chat
    pub async fn get_room_size(&self, chat_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(chat_id).map(|v| v.len()).unwrap_or(0)
    }

    /// Get total number of active rooms
    pub async fn get_room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.len()
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connection() -> Arc<Connection> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(Connection::new(tx))
    }

    #[tokio::test]
    async fn test_room_join_is_idempotent() {
        let room_manager = RoomManager::new();
        let conn = connection();

        // Initially room doesn't exist
        assert_eq!(room_manager.get_room_size("cust-1").await, 0);

        room_manager.join("cust-1", Arc::clone(&conn)).await;
        room_manager.join("cust-1", Arc::clone(&conn)).await;
        assert_eq!(room_manager.get_room_size("cust-1").await, 1);
    }

    #[tokio::test]
    async fn test_room_members_snapshot() {
        let room_manager = RoomManager::new();
        let conn1 = connection();
        let conn2 = connection();

        room_manager.join("cust-1", Arc::clone(&conn1)).await;
        room_manager.join("cust-1", Arc::clone(&conn2)).await;
        room_manager.join("cust-2", Arc::clone(&conn1)).await;

        let members = room_manager.members("cust-1").await;
        assert_eq!(members.len(), 2);
        assert!(members.iter().any(|c| c.connection_id == conn1.connection_id));
        assert!(members.iter().any(|c| c.connection_id == conn2.connection_id));

        // Unknown room is just empty
        assert!(room_manager.members("cust-99").await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_connection_from_all_rooms() {
        let room_manager = RoomManager::new();
        let conn = connection();

        room_manager.join("cust-1", Arc::clone(&conn)).await;
        room_manager.join("cust-2", Arc::clone(&conn)).await;

        assert_eq!(room_manager.get_room_count().await, 2);

        // Empty rooms are dropped entirely
        room_manager.remove_connection(&conn.connection_id).await;
        assert_eq!(room_manager.get_room_count().await, 0);
    }

    #[tokio::test]
    async fn test_remove_connection_keeps_other_members() {
        let room_manager = RoomManager::new();
        let conn1 = connection();
        let conn2 = connection();

        room_manager.join("cust-1", Arc::clone(&conn1)).await;
        room_manager.join("cust-1", Arc::clone(&conn2)).await;

        room_manager.remove_connection(&conn1.connection_id).await;

        let members = room_manager.members("cust-1").await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].connection_id, conn2.connection_id);
    }
}
