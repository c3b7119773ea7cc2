//! Chat lifecycle state machine
//!
//! A chat is `Active` until someone terminates it, and `Terminated` is
//! terminal: a finished conversation never reopens, a returning customer
//! starts a new session under a new identity. The machine is an in-process
//! cache write-through to the store, so the gate keeps holding even while
//! the store is unreachable.

use std::collections::HashMap;
use tokio::sync::RwLock;

use livedesk_shared::TerminatedBy;

use crate::store::ChatStore;

/// Result of a terminate request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The chat transitioned to Terminated now
    Applied,
    /// The chat had already been closed, and by whom
    AlreadyTerminated(TerminatedBy),
}

/// Tracks which chats have been terminated
pub struct SessionLifecycle {
    terminated: RwLock<HashMap<String, TerminatedBy>>,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            terminated: RwLock::new(HashMap::new()),
        }
    }

    /// Who terminated this chat, if anyone.
    ///
    /// Cache-first; unknown chats fall back to the store and positive
    /// answers are cached. A store fault is answered with `None`; an
    /// unreachable store must not lock customers out of live chats.
    pub async fn termination(&self, store: &dyn ChatStore, chat_id: &str) -> Option<TerminatedBy> {
        if let Some(by) = self.terminated.read().await.get(chat_id).copied() {
            return Some(by);
        }

        match store.session_termination(chat_id).await {
            Ok(Some(by)) => {
                self.terminated
                    .write()
                    .await
                    .insert(chat_id.to_string(), by);
                Some(by)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(
                    chat_id = %chat_id,
                    error = %err,
                    "Termination lookup failed; treating chat as active"
                );
                None
            }
        }
    }

    /// Transition a chat to Terminated.
    ///
    /// Idempotent: closing an already-terminated chat reports who closed it
    /// first instead of overwriting. The in-memory transition happens even
    /// when the write-through fails, so the gate holds for this process
    /// either way.
    pub async fn terminate(
        &self,
        store: &dyn ChatStore,
        chat_id: &str,
        by: TerminatedBy,
    ) -> TerminateOutcome {
        if let Some(existing) = self.termination(store, chat_id).await {
            return TerminateOutcome::AlreadyTerminated(existing);
        }

        self.terminated
            .write()
            .await
            .insert(chat_id.to_string(), by);

        if let Err(err) = store.set_terminated(chat_id, by).await {
            tracing::error!(
                chat_id = %chat_id,
                error = %err,
                "Failed to persist chat termination; in-memory gate still holds"
            );
        }

        tracing::info!(chat_id = %chat_id, by = %by, "Chat terminated");
        TerminateOutcome::Applied
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
