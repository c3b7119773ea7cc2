//! LiveDesk API Library
//!
//! This crate contains the chat server components for LiveDesk.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
