//! TOML Configuration File Support
//!
//! Centralized configuration for the relay, read from
//! `$XDG_CONFIG_HOME/telemetry-relay/relay.toml`.
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables (`RELAY_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:8000"
//! assets_dir = "/srv/cluster/assets"
//!
//! [upstream]
//! path = "./var/sensorgrabber.fifo"
//! read_buffer_size = 4096
//! max_line_length = 65536
//!
//! [reopen]
//! initial_delay_ms = 50
//! max_delay_ms = 5000
//! multiplier = 2.0
//! max_attempts = 0
//!
//! [viewers]
//! max_viewers = 64
//! outbound_capacity = 256
//! send_timeout_ms = 5000
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hub::DEFAULT_OUTBOUND_CAPACITY;
use crate::reader::{ReaderConfig, ReopenPolicy};

/// Default listening address
pub const DEFAULT_BIND: &str = "0.0.0.0:8000";

/// Default upstream path
pub const DEFAULT_UPSTREAM_PATH: &str = "./var/sensorgrabber.fifo";

/// Default maximum number of concurrent viewers
pub const DEFAULT_MAX_VIEWERS: usize = 64;

/// Default time a single viewer write may take before the viewer is evicted
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the configuration came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Built-in default
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[server]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Listening address
    pub bind: Option<String>,
    /// Directory served under `/assets`
    pub assets_dir: Option<PathBuf>,
}

/// `[upstream]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamToml {
    /// Path of the upstream file or named pipe
    pub path: Option<PathBuf>,
    /// Size of a single read
    pub read_buffer_size: Option<usize>,
    /// Longest partial line kept
    pub max_line_length: Option<usize>,
}

/// `[reopen]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReopenToml {
    /// Delay before the second reopen attempt
    pub initial_delay_ms: Option<u64>,
    /// Upper bound for any delay
    pub max_delay_ms: Option<u64>,
    /// Growth factor between attempts
    pub multiplier: Option<f64>,
    /// Attempts before giving up (0 = never)
    pub max_attempts: Option<u32>,
}

/// `[viewers]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewersToml {
    /// Maximum concurrent viewers
    pub max_viewers: Option<usize>,
    /// Batches queued per viewer before eviction
    pub outbound_capacity: Option<usize>,
    /// Longest a single write to a viewer may take
    pub send_timeout_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// Server section
    pub server: ServerToml,
    /// Upstream section
    pub upstream: UpstreamToml,
    /// Reopen section
    pub reopen: ReopenToml,
    /// Viewers section
    pub viewers: ViewersToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Resolved relay configuration
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Listening address
    pub bind: SocketAddr,
    /// Optional directory served under `/assets`
    pub assets_dir: Option<PathBuf>,
    /// Upstream file or named pipe
    pub upstream_path: PathBuf,
    /// Reader tunables, including the reopen policy
    pub reader: ReaderConfig,
    /// Maximum concurrent viewers
    pub max_viewers: usize,
    /// Batches queued per viewer before eviction
    pub outbound_capacity: usize,
    /// Longest a single write to a viewer may take before it is evicted
    pub send_timeout: Duration,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            assets_dir: None,
            upstream_path: PathBuf::from(DEFAULT_UPSTREAM_PATH),
            reader: ReaderConfig::default(),
            max_viewers: DEFAULT_MAX_VIEWERS,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Reject values the relay cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reader.read_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "upstream.read_buffer_size must be greater than zero".into(),
            ));
        }
        if self.reader.max_line_length == 0 {
            return Err(ConfigError::ValidationError(
                "upstream.max_line_length must be greater than zero".into(),
            ));
        }
        if self.outbound_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "viewers.outbound_capacity must be greater than zero".into(),
            ));
        }
        if self.max_viewers == 0 {
            return Err(ConfigError::ValidationError(
                "viewers.max_viewers must be greater than zero".into(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "viewers.send_timeout_ms must be greater than zero".into(),
            ));
        }
        let reopen = &self.reader.reopen;
        if reopen.initial_delay > reopen.max_delay {
            return Err(ConfigError::ValidationError(format!(
                "reopen.initial_delay_ms ({}) exceeds reopen.max_delay_ms ({})",
                reopen.initial_delay.as_millis(),
                reopen.max_delay.as_millis()
            )));
        }
        if !reopen.multiplier.is_finite() || reopen.multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "reopen.multiplier must be at least 1.0, got {}",
                reopen.multiplier
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/telemetry-relay/relay.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("telemetry-relay").join("relay.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed.
/// A missing config file is not an error.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with a custom environment lookup
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RelayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

fn parse_bind(value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse()
        .map_err(|e| ConfigError::ValidationError(format!("invalid bind address {value:?}: {e}")))
}

/// Apply TOML values to the config
fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) -> Result<(), ConfigError> {
    if let Some(ref bind) = toml.server.bind {
        config.bind = parse_bind(bind)?;
    }
    if toml.server.assets_dir.is_some() {
        config.assets_dir.clone_from(&toml.server.assets_dir);
    }

    if let Some(ref path) = toml.upstream.path {
        config.upstream_path.clone_from(path);
    }
    if let Some(size) = toml.upstream.read_buffer_size {
        config.reader.read_buffer_size = size;
    }
    if let Some(len) = toml.upstream.max_line_length {
        config.reader.max_line_length = len;
    }

    let reopen = &mut config.reader.reopen;
    if let Some(ms) = toml.reopen.initial_delay_ms {
        reopen.initial_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.reopen.max_delay_ms {
        reopen.max_delay = Duration::from_millis(ms);
    }
    if let Some(multiplier) = toml.reopen.multiplier {
        reopen.multiplier = multiplier;
    }
    if let Some(attempts) = toml.reopen.max_attempts {
        reopen.max_attempts = attempts;
    }

    if let Some(max) = toml.viewers.max_viewers {
        config.max_viewers = max;
    }
    if let Some(capacity) = toml.viewers.outbound_capacity {
        config.outbound_capacity = capacity;
    }
    if let Some(ms) = toml.viewers.send_timeout_ms {
        config.send_timeout = Duration::from_millis(ms);
    }
    Ok(())
}

/// Read and parse one environment variable, warning on bad values
fn env_value<T, F>(env: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = env(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}

/// Apply environment overrides to the config
fn apply_env_config<F>(config: &mut RelayConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(bind) = env_value::<SocketAddr, _>(&env, "RELAY_BIND") {
        config.bind = bind;
        config.source = ConfigSource::Env;
    }
    if let Some(path) = env("RELAY_SOURCE") {
        config.upstream_path = PathBuf::from(path);
        config.source = ConfigSource::Env;
    }
    if let Some(dir) = env("RELAY_ASSETS_DIR") {
        config.assets_dir = Some(PathBuf::from(dir));
        config.source = ConfigSource::Env;
    }
    if let Some(max) = env_value::<usize, _>(&env, "RELAY_MAX_VIEWERS") {
        config.max_viewers = max;
        config.source = ConfigSource::Env;
    }
    if let Some(capacity) = env_value::<usize, _>(&env, "RELAY_OUTBOUND_CAPACITY") {
        config.outbound_capacity = capacity;
        config.source = ConfigSource::Env;
    }
    if let Some(attempts) = env_value::<u32, _>(&env, "RELAY_REOPEN_MAX_ATTEMPTS") {
        config.reader.reopen.max_attempts = attempts;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listening address override
    pub bind: Option<SocketAddr>,
    /// Upstream path override
    pub upstream_path: Option<PathBuf>,
    /// Assets directory override
    pub assets_dir: Option<PathBuf>,
    /// Maximum viewers override
    pub max_viewers: Option<usize>,
}

impl ConfigOverrides {
    /// Create an empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listening address override
    #[must_use]
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = Some(bind);
        self
    }

    /// Set upstream path override
    #[must_use]
    pub fn with_upstream_path(mut self, path: PathBuf) -> Self {
        self.upstream_path = Some(path);
        self
    }

    /// Set assets directory override
    #[must_use]
    pub fn with_assets_dir(mut self, dir: PathBuf) -> Self {
        self.assets_dir = Some(dir);
        self
    }

    /// Set maximum viewers override
    #[must_use]
    pub fn with_max_viewers(mut self, max: usize) -> Self {
        self.max_viewers = Some(max);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut RelayConfig) {
        if self.bind.is_some()
            || self.upstream_path.is_some()
            || self.assets_dir.is_some()
            || self.max_viewers.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(ref path) = self.upstream_path {
            config.upstream_path.clone_from(path);
        }
        if self.assets_dir.is_some() {
            config.assets_dir.clone_from(&self.assets_dir);
        }
        if let Some(max) = self.max_viewers {
            config.max_viewers = max;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
