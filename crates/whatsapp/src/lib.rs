//! WhatsApp Web connector.
//!
//! Sessions are driven through a Baileys sidecar (a Node.js process) over a
//! local WebSocket. One socket carries every sender; messages are tagged
//! with the sender's account id.

pub mod config;
pub mod connector;
pub mod outbound;
pub mod sidecar;
pub(crate) mod state;
pub mod types;

pub use {
    config::SidecarOptions, connector::SidecarConnector, outbound::SidecarConnection,
    sidecar::DEFAULT_SIDECAR_PORT,
};
