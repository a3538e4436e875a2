//! HTTP API server for external control
//!
//! This module provides a REST API for controlling the recorder:
//! - POST /recording/start - Start a new recording
//! - POST /recording/stop - Stop the active recording
//! - GET /recording/status - Query session status
//! - GET /recording/events - Lifecycle event log
//! - GET /recording/history - Finished sessions
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
