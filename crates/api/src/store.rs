//! Durable chat storage
//!
//! All persistence goes through the [`ChatStore`] trait so the routing and
//! lifecycle logic can be exercised against an in-memory double. The
//! production implementation is [`PgChatStore`]; deduplication is enforced by
//! unique constraints in the schema, not by check-then-insert.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use livedesk_shared::{
    ChatMedia, ChatMessage, ChatSession, MediaItem, SessionSummary, StoreError, StoreResult,
    TerminatedBy,
};

const INSERT_MAX_RETRIES: usize = 2;
const INSERT_RETRY_BASE_DELAY: Duration = Duration::from_millis(50);
const INSERT_RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

/// Durable storage operations required by the chat engine
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Insert a message unless one with the same `message_id` already exists.
    ///
    /// Returns `true` if the row was written, `false` on a duplicate.
    async fn insert_message_if_absent(&self, message: &ChatMessage) -> StoreResult<bool>;

    /// Insert media attachments, skipping any `(message_id, file_url)` pair
    /// that is already present.
    async fn insert_media(&self, message_id: &str, items: &[MediaItem]) -> StoreResult<()>;

    /// Create or refresh a customer session row and set its online flag.
    /// `display_name` is only updated when provided.
    async fn upsert_session_activity(
        &self,
        participant_id: &str,
        display_name: Option<&str>,
        online: bool,
    ) -> StoreResult<()>;

    /// Bump `last_activity` for an existing session
    async fn touch_session(&self, chat_id: &str) -> StoreResult<()>;

    /// Mark a session terminated. Idempotent; creates the session row if the
    /// customer never registered.
    async fn set_terminated(&self, chat_id: &str, by: TerminatedBy) -> StoreResult<()>;

    /// Who terminated this session, if anyone
    async fn session_termination(&self, chat_id: &str) -> StoreResult<Option<TerminatedBy>>;

    /// All sessions with their admin-side unread counts, most recent first
    async fn list_sessions(&self, include_terminated: bool) -> StoreResult<Vec<SessionSummary>>;

    /// A single session row
    async fn get_session(&self, chat_id: &str) -> StoreResult<Option<ChatSession>>;

    /// The most recent `limit` messages of a chat in chronological order
    async fn list_messages(&self, chat_id: &str, limit: i64) -> StoreResult<Vec<ChatMessage>>;

    /// All media attached to any message of a chat
    async fn media_for_chat(&self, chat_id: &str) -> StoreResult<Vec<ChatMedia>>;
}

/// Postgres-backed chat store
pub struct PgChatStore {
    pool: PgPool,
}

impl PgChatStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn insert_message_if_absent(&self, message: &ChatMessage) -> StoreResult<bool> {
        use tokio_retry::strategy::{jitter, ExponentialBackoff};
        use tokio_retry::Retry;

        let retry_strategy = ExponentialBackoff::from_millis(INSERT_RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(INSERT_RETRY_MAX_DELAY)
            .take(INSERT_MAX_RETRIES)
            .map(jitter);

        // The statement is idempotent per message_id, so connectivity blips
        // can be retried without risking a double insert
        let outcome = Retry::spawn(retry_strategy, || async {
            let result = sqlx::query(
                r#"
                INSERT INTO chat_messages (message_id, chat_id, sender_id, sender_role, text, sent_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (message_id) DO NOTHING
                "#,
            )
            .bind(&message.message_id)
            .bind(&message.chat_id)
            .bind(&message.sender_id)
            .bind(message.sender_role)
            .bind(&message.text)
            .bind(message.sent_at)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from);

            match &result {
                Err(StoreError::Unavailable(_)) => {
                    tracing::debug!(
                        message_id = %message.message_id,
                        "Transient store error - will retry insert"
                    );
                    Err(result)
                }
                _ => Ok(result),
            }
        })
        .await;

        let result = match outcome {
            Ok(result) | Err(result) => result,
        }?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_media(&self, message_id: &str, items: &[MediaItem]) -> StoreResult<()> {
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO chat_media (message_id, file_name, file_url, media_type, file_size, mime_type)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (message_id, file_url) DO NOTHING
                "#,
            )
            .bind(message_id)
            .bind(&item.file_name)
            .bind(&item.file_url)
            .bind(item.media_type)
            .bind(item.file_size)
            .bind(&item.mime_type)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn upsert_session_activity(
        &self,
        participant_id: &str,
        display_name: Option<&str>,
        online: bool,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (customer_id, display_name, is_online, last_activity)
            VALUES ($1, COALESCE($2, $1), $3, NOW())
            ON CONFLICT (customer_id) DO UPDATE SET
              display_name = COALESCE($2, chat_sessions.display_name),
              is_online = $3,
              last_activity = NOW(),
              updated_at = NOW()
            "#,
        )
        .bind(participant_id)
        .bind(display_name)
        .bind(online)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch_session(&self, chat_id: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE chat_sessions SET last_activity = NOW(), updated_at = NOW() WHERE customer_id = $1",
        )
        .bind(chat_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_terminated(&self, chat_id: &str, by: TerminatedBy) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (customer_id, display_name, is_online, terminated, terminated_by, last_activity)
            VALUES ($1, $1, FALSE, TRUE, $2, NOW())
            ON CONFLICT (customer_id) DO UPDATE SET
              terminated = TRUE,
              terminated_by = $2,
              is_online = FALSE,
              updated_at = NOW()
            "#,
        )
        .bind(chat_id)
        .bind(by)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn session_termination(&self, chat_id: &str) -> StoreResult<Option<TerminatedBy>> {
        let by = sqlx::query_scalar::<_, TerminatedBy>(
            r#"
            SELECT terminated_by FROM chat_sessions
            WHERE customer_id = $1 AND terminated = TRUE AND terminated_by IS NOT NULL
            "#,
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(by)
    }

    async fn list_sessions(&self, include_terminated: bool) -> StoreResult<Vec<SessionSummary>> {
        // Unread = customer messages newer than the latest admin reply
        let sessions = sqlx::query_as::<_, SessionSummary>(
            r#"
            SELECT s.customer_id, s.display_name, s.is_online, s.last_activity, s.terminated,
                   (SELECT COUNT(*) FROM chat_messages m
                    WHERE m.chat_id = s.customer_id
                      AND m.sender_role = 'customer'
                      AND m.sent_at > COALESCE(
                          (SELECT MAX(m2.sent_at) FROM chat_messages m2
                           WHERE m2.chat_id = s.customer_id AND m2.sender_role = 'admin'),
                          'epoch'::timestamptz)) AS unread_count
            FROM chat_sessions s
            WHERE ($1 OR s.terminated = FALSE)
            ORDER BY s.last_activity DESC
            "#,
        )
        .bind(include_terminated)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn get_session(&self, chat_id: &str) -> StoreResult<Option<ChatSession>> {
        let session = sqlx::query_as::<_, ChatSession>(
            r#"
            SELECT customer_id, display_name, is_online, last_activity,
                   terminated, terminated_by, created_at, updated_at
            FROM chat_sessions
            WHERE customer_id = $1
            "#,
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn list_messages(&self, chat_id: &str, limit: i64) -> StoreResult<Vec<ChatMessage>> {
        let messages = sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT * FROM (
              SELECT message_id, chat_id, sender_id, sender_role, text, sent_at
              FROM chat_messages
              WHERE chat_id = $1
              ORDER BY sent_at DESC
              LIMIT $2
            ) recent
            ORDER BY recent.sent_at ASC
            "#,
        )
        .bind(chat_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    async fn media_for_chat(&self, chat_id: &str) -> StoreResult<Vec<ChatMedia>> {
        let media = sqlx::query_as::<_, ChatMedia>(
            r#"
            SELECT d.message_id, d.file_name, d.file_url, d.media_type, d.file_size, d.mime_type
            FROM chat_media d
            JOIN chat_messages m ON m.message_id = d.message_id
            WHERE m.chat_id = $1
            ORDER BY d.message_id
            "#,
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(media)
    }
}

// =============================================================================
// In-Memory Store (tests)
// =============================================================================

#[cfg(test)]
pub use memory::MemoryStore;


// =============================================================================
// Tests
// =============================================================================
