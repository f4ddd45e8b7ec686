//! Tontine validation workflow library.
//!
//! The binary in `main.rs` and the integration tests in `tests/` both build
//! on these modules.

use std::sync::Arc;

pub mod api;
pub mod authority;
pub mod cli;
pub mod client;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod store;
pub mod workflow;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub authority: Arc<authority::Authority>,
    pub dashboard_origin: Option<String>,
}
