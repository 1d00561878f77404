//! Axum HTTP + WebSocket surface for the test-execution relay.

pub mod config;
pub mod handlers;
pub mod server;
pub mod store;
pub mod ws;

pub use config::ServerConfig;
pub use server::{build_router, start, AppState, ServerHandle};
