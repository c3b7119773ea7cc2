//! API routes

pub mod chats;
pub mod health;

use axum::{extract::DefaultBodyLimit, http::HeaderValue, routing::get, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{config::Config, state::AppState, websocket::ws_handler};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Chat query routes - under /api/v1
    let api_v1_routes = Router::new()
        .route("/chats", get(chats::list_chats))
        .route("/chats/:chat_id", get(chats::get_chat))
        .route("/chats/:chat_id/messages", get(chats::get_chat_messages));

    // WebSocket endpoint; participants announce identity after the upgrade
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    let cors = cors_layer(&state.config);

    // Combine all routes
    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        // Request body cap; the WebSocket payload bounds are enforced per event
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .with_state(state)
}

/// CORS layer honoring `CORS_ALLOWED_ORIGINS` (`*` means any origin)
fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_allow_any_origin() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
