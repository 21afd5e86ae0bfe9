//! Configuration for the sync engine.
//!
//! Layered with the following priority (highest first):
//! 1. TOML config file (`~/.config/convosync/config.toml`)
//! 2. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::connection::ReconnectConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    api: ApiFileConfig,
    socket: SocketFileConfig,
    sync: SyncFileConfig,
}

/// `[api]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ApiFileConfig {
    base_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[socket]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SocketFileConfig {
    url: Option<String>,
    connect_timeout_secs: Option<u64>,
    reconnect_initial_delay_ms: Option<u64>,
    reconnect_max_delay_ms: Option<u64>,
    reconnect_max_attempts: Option<u32>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    typing_timeout_secs: Option<u64>,
    event_buffer: Option<usize>,
    notify_buffer: Option<usize>,
    provisional_match_window_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    // -- REST --
    /// API root URL (e.g. `https://host/api`).
    pub api_base_url: String,
    /// Per-request timeout for the REST collaborator.
    pub request_timeout: Duration,

    // -- Live channel --
    /// Live channel WebSocket URL.
    pub socket_url: String,
    /// Timeout for establishing the WebSocket connection.
    pub connect_timeout: Duration,
    /// Reconnection backoff policy.
    pub reconnect: ReconnectConfig,

    // -- Engine --
    /// How long a typing indicator lives without a stop signal.
    pub typing_timeout: Duration,
    /// Buffer size for the decoded event broadcast channel.
    pub event_buffer: usize,
    /// Buffer size for the notification channel.
    pub notify_buffer: usize,
    /// Creation-time proximity window for matching an optimistic echo to
    /// its server-confirmed message.
    pub provisional_match_window: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:4000/api".to_string(),
            request_timeout: Duration::from_secs(10),
            socket_url: "ws://localhost:4000/live".to_string(),
            connect_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
            typing_timeout: Duration::from_secs(3),
            event_buffer: 256,
            notify_buffer: 64,
            provisional_match_window: Duration::from_secs(30),
        }
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file merged over defaults.
    ///
    /// If `path` is given the file must exist. If `path` is `None`, the
    /// default path (`~/.config/convosync/config.toml`) is tried and
    /// silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit config file cannot be read,
    /// or if any config file fails to parse.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let file = load_config_file(path)?;
        Ok(Self::resolve(&file))
    }

    /// Resolve a `SyncConfig` from a parsed config file.
    ///
    /// Priority: file > default. Separated from `load()` to enable unit
    /// testing without touching the filesystem.
    #[must_use]
    fn resolve(file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            api_base_url: file
                .api
                .base_url
                .clone()
                .unwrap_or(defaults.api_base_url),
            request_timeout: file
                .api
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            socket_url: file.socket.url.clone().unwrap_or(defaults.socket_url),
            connect_timeout: file
                .socket
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            reconnect: ReconnectConfig {
                initial_delay: file
                    .socket
                    .reconnect_initial_delay_ms
                    .map_or(defaults.reconnect.initial_delay, Duration::from_millis),
                max_delay: file
                    .socket
                    .reconnect_max_delay_ms
                    .map_or(defaults.reconnect.max_delay, Duration::from_millis),
                max_attempts: file
                    .socket
                    .reconnect_max_attempts
                    .unwrap_or(defaults.reconnect.max_attempts),
            },
            typing_timeout: file
                .sync
                .typing_timeout_secs
                .map_or(defaults.typing_timeout, Duration::from_secs),
            event_buffer: file.sync.event_buffer.unwrap_or(defaults.event_buffer),
            notify_buffer: file.sync.notify_buffer.unwrap_or(defaults.notify_buffer),
            provisional_match_window: file
                .sync
                .provisional_match_window_secs
                .map_or(defaults.provisional_match_window, Duration::from_secs),
        }
    }
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing
/// file is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            // No config dir available — use defaults.
            return Ok(ConfigFile::default());
        };
        config_dir.join("convosync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
