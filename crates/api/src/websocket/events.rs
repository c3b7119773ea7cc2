//! WebSocket event types and serialization
//!
//! Defines all client-to-server and server-to-client event types
//! with type-safe serde serialization.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use livedesk_shared::{MediaItem, Role, SessionSummary, TerminatedBy};

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Announce identity for this connection
    Register {
        role: Role,
        participant_id: String,
        #[serde(default)]
        display_name: Option<String>,
    },

    /// Join a chat room to receive its messages
    JoinChat {
        chat_id: String,
        role: Role,
        participant_id: String,
    },

    /// Send a chat message, optionally with media attachments
    SendMessage {
        message_id: String,
        chat_id: String,
        sender_id: String,
        sender_role: Role,
        #[serde(default)]
        text: String,
        #[serde(default)]
        media: Vec<MediaItem>,
    },

    /// Permanently close a customer's chat
    TerminateChat { customer_id: String, by: TerminatedBy },

    /// Heartbeat ping to keep connection alive
    Ping,
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection acknowledged
    Connected { connection_id: Uuid },

    /// Full list of online customers (sent to admins)
    OnlineUsers { users: Vec<OnlineUser> },

    /// Whether any support agent is online (sent to customers)
    AdminStatus {
        online: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },

    /// A single customer went online or offline (sent to admins)
    CustomerStatus { participant_id: String, online: bool },

    /// Chat message delivered to this connection
    ReceiveMessage {
        message_id: String,
        chat_id: String,
        sender_id: String,
        sender_role: Role,
        text: String,
        #[serde(with = "time::serde::rfc3339")]
        timestamp: OffsetDateTime,
        delivered: bool,
        media: Vec<MediaItem>,
    },

    /// Session roster with unread counts (sent to admins)
    CustomerList { customers: Vec<SessionSummary> },

    /// Acknowledges a termination this connection asked for,
    /// or signals that the chat was already closed
    ChatTerminated { chat_id: String, by: TerminatedBy },

    /// A support agent closed this customer's chat
    ChatTerminatedByAdmin { chat_id: String },

    /// The customer closed their own chat (sent to admins)
    ChatTerminatedByCustomer { chat_id: String },

    /// Heartbeat response
    Pong,

    /// Error message
    Error { message: String },
}

// =============================================================================
// Event Data Structures
// =============================================================================

/// Online customer entry
#[derive(Debug, Serialize, Clone)]
pub struct OnlineUser {
    pub participant_id: String,
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_event_deserialization() {
        let json = r#"{"type":"register","role":"customer","participant_id":"cust-1"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::Register {
                role,
                participant_id,
                display_name,
            } => {
                assert_eq!(role, Role::Customer);
                assert_eq!(participant_id, "cust-1");
                assert_eq!(display_name, None);
            }
            _ => panic!("Expected Register event"),
        }
    }

    #[test]
    fn test_register_accepts_role_aliases() {
        let json = r#"{"type":"register","role":"support","participant_id":"agent-1","display_name":"Sam"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::Register { role, .. } => assert_eq!(role, Role::Admin),
            _ => panic!("Expected Register event"),
        }
    }

    #[test]
    fn test_send_message_defaults() {
        let json = r#"{"type":"send_message","message_id":"m1","chat_id":"cust-1","sender_id":"cust-1","sender_role":"customer"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::SendMessage { text, media, .. } => {
                assert!(text.is_empty());
                assert!(media.is_empty());
            }
            _ => panic!("Expected SendMessage event"),
        }
    }

    #[test]
    fn test_terminate_event_deserialization() {
        let json = r#"{"type":"terminate_chat","customer_id":"cust-1","by":"support"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::TerminateChat { customer_id, by } => {
                assert_eq!(customer_id, "cust-1");
                assert_eq!(by, TerminatedBy::Support);
            }
            _ => panic!("Expected TerminateChat event"),
        }
    }

    #[test]
    fn test_server_event_serialization() {
        let event = ServerEvent::Pong;
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_admin_status_omits_empty_name() {
        let event = ServerEvent::AdminStatus {
            online: false,
            display_name: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"admin_status","online":false}"#);
    }

    #[test]
    fn test_receive_message_serialization() {
        let event = ServerEvent::ReceiveMessage {
            message_id: "m1".to_string(),
            chat_id: "cust-1".to_string(),
            sender_id: "cust-1".to_string(),
            sender_role: Role::Customer,
            text: "hi".to_string(),
            timestamp: OffsetDateTime::from_unix_timestamp(1_720_000_000).unwrap(),
            delivered: true,
            media: vec![],
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"receive_message""#));
        assert!(json.contains(r#""sender_role":"customer""#));
        assert!(json.contains(r#""delivered":true"#));
        // RFC 3339 timestamp, not a unix epoch number
        assert!(json.contains("2024-"));
    }

    #[test]
    fn test_error_event_serialization() {
        let event = ServerEvent::Error {
            message: "Test error".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("error"));
        assert!(json.contains("Test error"));
    }
}
