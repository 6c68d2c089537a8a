//! Configuration for the wabcast gateway.
//!
//! Read from `wabcast.toml`. Every field has a default so a missing file or
//! a partial file is always valid.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    anyhow::{Context, Result},
    serde::{Deserialize, Serialize},
    tracing::{debug, info},
};

/// File name looked up in the platform config directory.
pub const CONFIG_FILE_NAME: &str = "wabcast.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WabcastConfig {
    pub server: ServerConfig,
    pub contacts: ContactsConfig,
    pub sidecar: SidecarConfig,
    pub sessions: SessionsConfig,
    pub dispatch: DispatchConfig,
    pub store: StoreConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 3001,
        }
    }
}

/// Address book location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactsConfig {
    pub path: PathBuf,
}

impl Default for ContactsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("contacts.json"),
        }
    }
}

/// Connection to the WhatsApp Web sidecar process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Local WebSocket port the sidecar listens on.
    pub port: u16,
    /// Connection attempts before giving up on the sidecar.
    pub connect_retries: u32,
    /// Directory for the sidecar's per-sender auth state. The sidecar picks
    /// its own default when unset.
    pub auth_dir: Option<String>,
    /// Upper bound for a status check or a single send round-trip.
    pub request_timeout_secs: u64,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            port: 9876,
            connect_retries: 3,
            auth_dir: None,
            request_timeout_secs: 30,
        }
    }
}

impl SidecarConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// How long a start request waits for the first QR or ready signal.
    pub start_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            start_timeout_secs: 60,
        }
    }
}

impl SessionsConfig {
    pub fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.start_timeout_secs)
    }
}

/// Broadcast pacing and number formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Pause after each attempted delivery, in milliseconds.
    pub pacing_ms: u64,
    /// Prefixed to bare 10-digit numbers, e.g. `"1"`.
    pub default_country_code: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            pacing_ms: 1000,
            default_country_code: None,
        }
    }
}

impl DispatchConfig {
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// Auth token persistence. In-memory when `sqlite_path` is unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub sqlite_path: Option<PathBuf>,
}

/// Default config file location (`<config dir>/wabcast.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "wabcast")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// Parse a config file.
pub fn load_from_path(path: &Path) -> Result<WabcastConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: WabcastConfig = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Load the config from an explicit path, else the default location, else
/// fall back to defaults.
///
/// An explicit path that cannot be read is an error; a missing default file
/// is not.
pub fn load_config(explicit: Option<&Path>) -> Result<WabcastConfig> {
    if let Some(path) = explicit {
        return load_from_path(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => load_from_path(&path),
        Some(path) => {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(WabcastConfig::default())
        },
        None => Ok(WabcastConfig::default()),
    }
}
