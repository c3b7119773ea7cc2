//! Chat session query routes
//!
//! Read-only HTTP twins of the admin-facing WebSocket resyncs: the session
//! roster, a single session, and message history with attached media. Live
//! online flags always come from the connection registry, never from the
//! stored column.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use livedesk_shared::{ChatMessage, ChatSession, MediaItem, SessionSummary};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::store::ChatStore;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListChatsQuery {
    #[serde(default)]
    pub include_terminated: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatsListResponse {
    pub chats: Vec<SessionSummary>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MessageWithMedia {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub media: Vec<MediaItem>,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub chat_id: String,
    pub messages: Vec<MessageWithMedia>,
}

// =============================================================================
// Handlers
// =============================================================================

/// List chat sessions with admin-side unread counts, most recent first
pub async fn list_chats(
    State(state): State<AppState>,
    Query(query): Query<ListChatsQuery>,
) -> ApiResult<Json<ChatsListResponse>> {
    let mut chats = state.store.list_sessions(query.include_terminated).await?;

    for chat in &mut chats {
        chat.is_online = state
            .ws_state
            .is_participant_online(&chat.customer_id)
            .await;
    }

    let total = chats.len();
    Ok(Json(ChatsListResponse { chats, total }))
}

/// Get a single chat session
pub async fn get_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> ApiResult<Json<ChatSession>> {
    let mut session = state
        .store
        .get_session(&chat_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    session.is_online = state
        .ws_state
        .is_participant_online(&session.customer_id)
        .await;

    Ok(Json(session))
}

/// Get the most recent messages of a chat, oldest first, media attached
pub async fn get_chat_messages(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<MessagesResponse>> {
    let limit = clamp_limit(query.limit);

    let messages = state.store.list_messages(&chat_id, limit).await?;

    let mut media_by_message: HashMap<String, Vec<MediaItem>> = HashMap::new();
    for item in state.store.media_for_chat(&chat_id).await? {
        media_by_message
            .entry(item.message_id.clone())
            .or_default()
            .push(item.into());
    }

    let messages = messages
        .into_iter()
        .map(|message| {
            let media = media_by_message
                .remove(&message.message_id)
                .unwrap_or_default();
            MessageWithMedia { message, media }
        })
        .collect();

    Ok(Json(MessagesResponse { chat_id, messages }))
}

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT)
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use livedesk_shared::{MediaType, Role};

    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), 50);
        assert_eq!(clamp_limit(Some(10)), 10);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-5)), 1);
        assert_eq!(clamp_limit(Some(1_000)), 200);
    }

    #[test]
    fn test_message_with_media_flattens_message_fields() {
        let entry = MessageWithMedia {
            message: ChatMessage {
                message_id: "m1".to_string(),
                chat_id: "cust-1".to_string(),
                sender_id: "cust-1".to_string(),
                sender_role: Role::Customer,
                text: "look at this".to_string(),
                sent_at: OffsetDateTime::from_unix_timestamp(1_720_000_000).unwrap(),
            },
            media: vec![MediaItem {
                file_name: "a.png".to_string(),
                file_url: "https://cdn.example.com/a.png".to_string(),
                media_type: MediaType::Image,
                file_size: Some(42),
                mime_type: Some("image/png".to_string()),
            }],
        };

        let json = serde_json::to_value(&entry).unwrap();
        // Message fields sit at the top level next to the media array
        assert_eq!(json["message_id"], "m1");
        assert_eq!(json["text"], "look at this");
        assert_eq!(json["media"][0]["file_url"], "https://cdn.example.com/a.png");
        assert_eq!(json["media"][0]["media_type"], "image");
    }
}
