//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::Config;
use crate::store::{ChatStore, PgChatStore};
use crate::websocket::ChatState;

/// State shared across all request handlers and WebSocket connections
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub pool: PgPool,

    /// Application configuration
    pub config: Arc<Config>,

    /// Durable chat storage
    pub store: Arc<dyn ChatStore>,

    /// Live connection, room, and lifecycle state
    pub ws_state: ChatState,
}

impl AppState {
    /// Create application state backed by Postgres
    pub fn new(pool: PgPool, config: Config) -> Self {
        Self {
            store: Arc::new(PgChatStore::new(pool.clone())),
            pool,
            config: Arc::new(config),
            ws_state: ChatState::new(),
        }
    }
}
