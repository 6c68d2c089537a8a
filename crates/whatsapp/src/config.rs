//! Sidecar connection options.

use std::{path::PathBuf, time::Duration};

use crate::sidecar::DEFAULT_SIDECAR_PORT;

/// How to reach the WhatsApp Web sidecar.
#[derive(Debug, Clone)]
pub struct SidecarOptions {
    /// Local port of the sidecar WebSocket.
    pub port: u16,
    /// Connect attempts before giving up.
    pub connect_retries: u32,
    pub retry_delay: Duration,
    /// Parent directory for per-sender auth state. Each sender gets its own
    /// subdirectory. `None` lets the sidecar pick.
    pub auth_dir: Option<PathBuf>,
    /// Upper bound for status checks and send acknowledgements.
    pub request_timeout: Duration,
}

impl Default for SidecarOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_SIDECAR_PORT,
            connect_retries: 3,
            retry_delay: Duration::from_secs(2),
            auth_dir: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl SidecarOptions {
    pub(crate) fn auth_dir_for(&self, account_id: &str) -> Option<String> {
        self.auth_dir
            .as_ref()
            .map(|dir| dir.join(account_id).display().to_string())
    }
}
