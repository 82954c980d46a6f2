//! Configuration management for fedstream
//!
//! Configuration comes from a TOML file or from defaults, optionally
//! overridden by environment variables, and is validated before use.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

use crate::core_authoring::{AssociationTargetPolicy, FanoutPolicy};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub stream: StreamConfig,
    pub authoring: AuthoringConfig,
    pub federation: FederationConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Object store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file. `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,

    /// Maximum pooled connections
    pub pool_size: u32,
}

/// Stream log and live channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Buffered events per live channel before slow subscribers lag
    pub live_capacity: usize,

    /// Page size used by backlog cursors
    pub backlog_page_size: usize,
}

/// Authoring service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthoringConfig {
    /// Whether associations must point at an existing message
    pub association_target: AssociationTargetPolicy,

    /// Total attempts per target stream during fan-out
    pub fanout_max_attempts: u32,

    /// Pause between fan-out attempts on the same stream
    #[serde(with = "humantime_serde")]
    pub fanout_retry_backoff: Duration,
}

/// Federation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    /// This host's own domain, as peers know it
    pub host: String,

    /// Peer hosts polled for registry changes
    pub peers: Vec<String>,

    /// Interval between sync rounds
    #[serde(with = "humantime_serde")]
    pub sync_interval: Duration,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub json_format: bool,
    pub with_timestamp: bool,
    pub with_target: bool,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Register metric descriptions at startup
    pub enabled: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            pool_size: 8,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            live_capacity: 256,
            backlog_page_size: 100,
        }
    }
}

impl Default for AuthoringConfig {
    fn default() -> Self {
        Self {
            association_target: AssociationTargetPolicy::Unchecked,
            fanout_max_attempts: 3,
            fanout_retry_backoff: Duration::from_millis(50),
        }
    }
}

impl AuthoringConfig {
    pub fn fanout_policy(&self) -> FanoutPolicy {
        FanoutPolicy {
            max_attempts: self.fanout_max_attempts,
            retry_backoff: self.fanout_retry_backoff,
        }
    }
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            peers: Vec::new(),
            sync_interval: Duration::from_secs(60),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from defaults plus environment variables
    ///
    /// Environment variables follow the pattern: FEDSTREAM_<SECTION>_<KEY>
    /// Example: FEDSTREAM_FEDERATION_HOST=social.example.net
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let mut config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(path) = env::var("FEDSTREAM_STORE_DATABASE_PATH") {
            self.store.database_path = Some(PathBuf::from(path));
        }
        if let Some(size) = env_parse("FEDSTREAM_STORE_POOL_SIZE")? {
            self.store.pool_size = size;
        }
        if let Some(capacity) = env_parse("FEDSTREAM_STREAM_LIVE_CAPACITY")? {
            self.stream.live_capacity = capacity;
        }
        if let Some(policy) = env_parse("FEDSTREAM_AUTHORING_ASSOCIATION_TARGET")? {
            self.authoring.association_target = policy;
        }
        if let Some(attempts) = env_parse("FEDSTREAM_AUTHORING_FANOUT_MAX_ATTEMPTS")? {
            self.authoring.fanout_max_attempts = attempts;
        }
        if let Ok(host) = env::var("FEDSTREAM_FEDERATION_HOST") {
            self.federation.host = host;
        }
        if let Ok(peers) = env::var("FEDSTREAM_FEDERATION_PEERS") {
            self.federation.peers = peers
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Ok(level) = env::var("FEDSTREAM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = env_parse("FEDSTREAM_LOG_JSON")? {
            self.logging.json_format = json;
        }
        if let Some(enabled) = env_parse("FEDSTREAM_METRICS_ENABLED")? {
            self.metrics.enabled = enabled;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.pool_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "pool_size must be greater than 0".to_string(),
            ));
        }

        if self.stream.live_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "live_capacity must be greater than 0".to_string(),
            ));
        }

        if self.stream.backlog_page_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "backlog_page_size must be greater than 0".to_string(),
            ));
        }

        if self.authoring.fanout_max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "fanout_max_attempts must be at least 1".to_string(),
            ));
        }

        if self.federation.host.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "federation host must not be empty".to_string(),
            ));
        }

        if self.federation.peers.iter().any(|p| p == &self.federation.host) {
            return Err(ConfigError::ValidationFailed(format!(
                "host {} lists itself as a peer",
                self.federation.host
            )));
        }

        if self.federation.sync_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "sync_interval must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;

        Ok(())
    }
}
