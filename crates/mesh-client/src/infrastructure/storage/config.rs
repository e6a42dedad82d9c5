//! TOML-based configuration for the mesh client.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\MeshClient\config.toml`
//! - Linux:    `~/.config/meshclient/config.toml`
//! - macOS:    `~/Library/Application Support/MeshClient/config.toml`
//!
//! Example:
//!
//! ```toml
//! [server]
//! host = "mesh.local"
//! port = 7890
//!
//! [subscriptions]
//! mode = "patterns"
//! patterns = ["@routing/*", "@services/*", "@ping", "@pong"]
//!
//! [reconnect]
//! backoff_secs = 10
//! ```
//!
//! Every field carries a serde default, so a partial file (or none at all)
//! yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mesh_core::protocol::messages::{ReceiveMode, DEFAULT_SUBSCRIPTIONS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::infrastructure::network::{
    LivenessPolicy, ReadTimeouts, SessionConfig, SubscriptionMode, SupervisorConfig, TcpConnector,
};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the mesh server listens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Which subscribe request the handshake sends.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    #[default]
    Patterns,
    Legacy,
}

/// `receive-mode` of the legacy subscribe request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LegacyReceiveMode {
    #[default]
    All,
    NoEcho,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionsConfig {
    #[serde(default)]
    pub mode: SubscriptionKind,
    /// Used when `mode = "patterns"`.
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,
    /// Used when `mode = "legacy"`.
    #[serde(default)]
    pub legacy_receive_mode: LegacyReceiveMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutsConfig {
    /// Longest silence inside one object before the read fails.
    #[serde(default = "default_inactivity_secs")]
    pub inactivity_secs: u64,
    /// Longest time one object may take to arrive.
    #[serde(default = "default_total_secs")]
    pub total_secs: u64,
    #[serde(default = "default_handshake_secs")]
    pub handshake_secs: u64,
    #[serde(default = "default_write_secs")]
    pub write_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LivenessConfig {
    #[serde(default = "default_ping_after_secs")]
    pub ping_after_secs: u64,
    #[serde(default = "default_ping_spacing_secs")]
    pub ping_spacing_secs: u64,
    #[serde(default = "default_pong_deadline_secs")]
    pub pong_deadline_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    7890
}
fn default_patterns() -> Vec<String> {
    DEFAULT_SUBSCRIPTIONS.iter().map(|s| s.to_string()).collect()
}
fn default_inactivity_secs() -> u64 {
    5
}
fn default_total_secs() -> u64 {
    120
}
fn default_handshake_secs() -> u64 {
    1
}
fn default_write_secs() -> u64 {
    5
}
fn default_ping_after_secs() -> u64 {
    60
}
fn default_ping_spacing_secs() -> u64 {
    7
}
fn default_pong_deadline_secs() -> u64 {
    120
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_backoff_secs() -> u64 {
    10
}
fn default_connect_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            mode: SubscriptionKind::default(),
            patterns: default_patterns(),
            legacy_receive_mode: LegacyReceiveMode::default(),
        }
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            inactivity_secs: default_inactivity_secs(),
            total_secs: default_total_secs(),
            handshake_secs: default_handshake_secs(),
            write_secs: default_write_secs(),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_after_secs: default_ping_after_secs(),
            ping_spacing_secs: default_ping_spacing_secs(),
            pong_deadline_secs: default_pong_deadline_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_secs: default_backoff_secs(),
            connect_secs: default_connect_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Runtime conversion ────────────────────────────────────────────────────────

impl AppConfig {
    pub fn subscription_mode(&self) -> SubscriptionMode {
        match self.subscriptions.mode {
            SubscriptionKind::Patterns => SubscriptionMode::Patterns(self.subscriptions.patterns.clone()),
            SubscriptionKind::Legacy => SubscriptionMode::Legacy(match self.subscriptions.legacy_receive_mode {
                LegacyReceiveMode::All => ReceiveMode::All,
                LegacyReceiveMode::NoEcho => ReceiveMode::NoEcho,
            }),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            subscriptions: self.subscription_mode(),
            handshake_timeout: Duration::from_secs(self.timeouts.handshake_secs),
            read_timeouts: ReadTimeouts {
                inactivity: Duration::from_secs(self.timeouts.inactivity_secs),
                total: Duration::from_secs(self.timeouts.total_secs),
            },
            write_timeout: Duration::from_secs(self.timeouts.write_secs),
            liveness: LivenessPolicy {
                ping_after: Duration::from_secs(self.liveness.ping_after_secs),
                ping_spacing: Duration::from_secs(self.liveness.ping_spacing_secs),
                pong_deadline: Duration::from_secs(self.liveness.pong_deadline_secs),
                poll_interval: Duration::from_millis(self.liveness.poll_interval_ms),
            },
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            backoff: Duration::from_secs(self.reconnect.backoff_secs),
            connect_timeout: Duration::from_secs(self.reconnect.connect_secs),
            session: self.session_config(),
        }
    }

    pub fn connector(&self) -> TcpConnector {
        TcpConnector::new(self.server.host.clone(), self.server.port)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from the platform config file.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolves the platform config base directory including the `MeshClient`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("MeshClient"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("meshclient"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("MeshClient"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
