//! HTTP API server for local control (voice UI front-end)
//!
//! This module provides a REST API over the session orchestrator:
//! - POST /session/start - Open a session (capturing)
//! - POST /session/submit - Upload captured audio, stream the reply
//! - POST /session/cancel - Stop the current session
//! - GET /session/status - Query session statistics
//! - GET /session/transcript - Get the reply text so far
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
