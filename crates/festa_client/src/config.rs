//! Client config load/save for `~/.festa/config.yaml`.
//! Every section and field is optional; missing values take the defaults below.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::{
    websocket_endpoint, RetryPolicy, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_RECONNECT_ATTEMPTS,
    DEFAULT_RECONNECT_DELAY,
};
use crate::models::DEFAULT_MODEL;

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_WS_PATH: &str = "/ws/chat";

/// Server section (HTTP base URL, socket path).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ServerSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_path: Option<String>,
}

/// Reconnect and handshake timing.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ConnectionSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_reconnect_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconnect_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ChatSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

/// Where threads and the connection identity are kept.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct StorageSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub chat: ChatSection,
    #[serde(default)]
    pub storage: StorageSection,
}

impl Config {
    pub fn server_url(&self) -> &str {
        self.server.url.as_deref().unwrap_or(DEFAULT_SERVER_URL)
    }

    /// Socket endpoint derived from the server URL (`http` -> `ws`, `https` -> `wss`).
    pub fn websocket_url(&self) -> String {
        let path = self.server.ws_path.as_deref().unwrap_or(DEFAULT_WS_PATH);
        websocket_endpoint(self.server_url(), path)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self
                .connection
                .max_reconnect_attempts
                .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            delay: self
                .connection
                .reconnect_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RECONNECT_DELAY),
            handshake_timeout: self
                .connection
                .handshake_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT),
        }
    }

    pub fn default_model(&self) -> &str {
        self.chat.default_model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Storage file, or `~/.festa/storage.json`.
    pub fn storage_path(&self) -> Option<PathBuf> {
        match &self.storage.path {
            Some(path) => Some(path.clone()),
            None => Some(festa_dir()?.join("storage.json")),
        }
    }
}

/// Returns the default config file path: `~/.festa/config.yaml` (platform-specific).
pub fn default_config_path() -> Option<PathBuf> {
    Some(festa_dir()?.join("config.yaml"))
}

fn festa_dir() -> Option<PathBuf> {
    Some(home_dir()?.join(".festa"))
}

#[cfg(unix)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(windows)]
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE").map(PathBuf::from)
}

#[cfg(not(any(unix, windows)))]
fn home_dir() -> Option<PathBuf> {
    None
}

/// Load config from a YAML file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Like [`load`], but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    load(path)
}

/// Save config to a YAML file. Creates parent directory if missing.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    std::fs::write(path, contents).map_err(io_err)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
