//! HTTP API
//!
//! REST endpoints for swap creation, status queries and cooperative
//! signing, plus WebSocket streaming of status events.

pub mod server;
pub mod ws;

pub use server::{create_router, start_server, AppState, SharedState};
