//! HTTP facade: session lifecycle, broadcast, contacts and a WebSocket
//! event stream.

pub mod contact_routes;
pub mod error;
pub mod server;
pub mod session_routes;
pub mod ws;

pub use {
    error::ApiError,
    server::{AppState, build_router, serve},
};
