//! Per-sender WhatsApp session lifecycle.
//!
//! The [`SessionRegistry`] owns one [`SessionRecord`] per sender. The
//! [`SessionController`] starts external connections through a
//! [`Connector`], feeds their lifecycle events through
//! [`SessionState::apply`], and gates usage on live connectivity checks.

pub mod connection;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod registry;
pub mod state;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use {
    connection::{ConnectOptions, Connection, Connector, LifecycleSink},
    error::{Error, Result},
    events::{EventBus, SessionEvent},
    lifecycle::{SessionController, StartOutcome, StatusReport},
    registry::{SessionRecord, SessionRegistry, SessionSummary},
    state::{LifecycleEvent, SessionState},
    store::{MemoryTokenStore, SqliteTokenStore, TokenStore},
};
