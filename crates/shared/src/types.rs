//! Common types used across LiveDesk

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Upper bound on the text body of a single message, in bytes.
pub const MAX_TEXT_LEN: usize = 50_000;

/// Upper bound on the number of media attachments per message.
pub const MAX_MEDIA_PER_MESSAGE: usize = 10;

// =============================================================================
// Enums
// =============================================================================

/// Participant role within a chat session
///
/// Older frontends send `user` for customers and `support` for admins;
/// both spellings are accepted on input and normalized on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "user")]
    Customer,
    #[serde(alias = "support")]
    Admin,
}

impl Role {
    /// The role on the other side of the conversation
    pub fn opposite(&self) -> Self {
        match self {
            Self::Customer => Self::Admin,
            Self::Admin => Self::Customer,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "customer" | "user" => Ok(Self::Customer),
            "admin" | "support" => Ok(Self::Admin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Which side ended a chat session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TerminatedBy {
    Customer,
    Support,
}

impl std::fmt::Display for TerminatedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Customer => write!(f, "customer"),
            Self::Support => write!(f, "support"),
        }
    }
}

impl std::str::FromStr for TerminatedBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "customer" => Ok(Self::Customer),
            "support" | "admin" => Ok(Self::Support),
            _ => Err(format!("Invalid terminator: {}", s)),
        }
    }
}

/// Kind of media attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Gif,
    File,
}

impl Default for MediaType {
    fn default() -> Self {
        Self::File
    }
}

impl MediaType {
    /// Parse a media type from string (case insensitive)
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "image" => Self::Image,
            "video" => Self::Video,
            "gif" => Self::Gif,
            _ => Self::File, // Unknown kinds are treated as plain files
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
            Self::Gif => write!(f, "gif"),
            Self::File => write!(f, "file"),
        }
    }
}

// =============================================================================
// Database Models
// =============================================================================

/// Chat message model
///
/// `message_id` is client-assigned and globally unique; the row is written
/// once and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub message_id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender_role: Role,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub sent_at: OffsetDateTime,
}

/// Media attachment as carried on the wire, keyed under its parent message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub file_name: String,
    pub file_url: String,
    #[serde(default)]
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Media attachment model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatMedia {
    pub message_id: String,
    pub file_name: String,
    pub file_url: String,
    pub media_type: MediaType,
    pub file_size: Option<i64>,
    pub mime_type: Option<String>,
}

impl From<ChatMedia> for MediaItem {
    fn from(media: ChatMedia) -> Self {
        Self {
            file_name: media.file_name,
            file_url: media.file_url,
            media_type: media.media_type,
            file_size: media.file_size,
            mime_type: media.mime_type,
        }
    }
}

/// Chat session model
///
/// One row per customer, created on first registration and soft-terminated
/// instead of deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatSession {
    pub customer_id: String,
    pub display_name: String,
    pub is_online: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
    pub terminated: bool,
    pub terminated_by: Option<TerminatedBy>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ChatSession {
    /// Whether a new message or registration may still target this session
    pub fn accepts_traffic(&self) -> bool {
        !self.terminated
    }
}

/// Per-customer summary pushed to admins and served from the session list endpoint
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionSummary {
    pub customer_id: String,
    pub display_name: String,
    pub is_online: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity: OffsetDateTime,
    pub unread_count: i64,
    pub terminated: bool,
}

// =============================================================================
// Tests
// =============================================================================
