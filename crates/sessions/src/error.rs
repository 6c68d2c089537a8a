//! Request-level errors for session and dispatch operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or empty input; nothing was touched.
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("no session for sender '{0}'")]
    SessionNotFound(String),

    /// A session exists but its connection failed its status check.
    #[error("session for sender '{0}' is not connected")]
    NotConnected(String),

    /// Creating or releasing the external connection failed.
    #[error("external connection error: {0}")]
    ExternalConnection(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Trim a sender id and reject it when empty.
pub fn validate_sender(sender_id: &str) -> Result<&str> {
    let trimmed = sender_id.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("sender id is required".into()));
    }
    Ok(trimmed)
}
