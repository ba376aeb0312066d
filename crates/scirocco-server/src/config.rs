//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

use scirocco_queue::QueuePolicy;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Authentication settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Retry and lease settings.
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "scirocco_queue=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Token every client must present in the `Authorization` header.
    #[serde(default = "default_master_token")]
    pub master_token: String,
}

/// Queue behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Claims allowed before a nack moves the message to `error`.
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,

    /// Seconds before a nacked message may be claimed again.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Seconds a claim lasts before the message returns to `pending`.
    /// `0` disables lease expiry.
    #[serde(default)]
    pub lease_timeout_secs: u64,

    /// Seconds between lease reaper runs.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

/// Upper bound for `retry_delay_secs` and `lease_timeout_secs`: one year.
pub const MAX_QUEUE_DELAY_SECS: u64 = 365 * 24 * 60 * 60;

impl QueueConfig {
    /// Rejects delays beyond [`MAX_QUEUE_DELAY_SECS`].
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, secs) in [
            ("queue.retry_delay_secs", self.retry_delay_secs),
            ("queue.lease_timeout_secs", self.lease_timeout_secs),
        ] {
            if secs > MAX_QUEUE_DELAY_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{name} is {secs}, the maximum is {MAX_QUEUE_DELAY_SECS}"
                )));
            }
        }
        Ok(())
    }

    /// Engine policy derived from these settings.
    pub fn policy(&self) -> QueuePolicy {
        QueuePolicy {
            max_tries: self.max_tries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            lease_timeout: (self.lease_timeout_secs > 0)
                .then(|| Duration::from_secs(self.lease_timeout_secs)),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8081
}

fn default_db_path() -> String {
    "scirocco.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_master_token() -> String {
    "DEFAULT_TOKEN".to_string()
}

fn default_max_tries() -> u32 {
    5
}

fn default_retry_delay_secs() -> u64 {
    10
}

fn default_reaper_interval_secs() -> u64 {
    5
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            master_token: default_master_token(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_tries: default_max_tries(),
            retry_delay_secs: default_retry_delay_secs(),
            lease_timeout_secs: 0,
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A setting is outside its allowed range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `SCIROCCO_HOST` overrides `server.host`
/// - `SCIROCCO_PORT` overrides `server.port`
/// - `SCIROCCO_DB_PATH` overrides `database.path`
/// - `SCIROCCO_LOG_LEVEL` overrides `logging.level`
/// - `SCIROCCO_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `SCIROCCO_MASTER_TOKEN` overrides `auth.master_token`
/// - `SCIROCCO_MAX_TRIES` overrides `queue.max_tries`
/// - `SCIROCCO_RETRY_DELAY_SECS` overrides `queue.retry_delay_secs`
/// - `SCIROCCO_LEASE_TIMEOUT_SECS` overrides `queue.lease_timeout_secs`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if a queue delay is out of range after overrides.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => parse_config(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.queue.validate()?;
    Ok(config)
}

/// Parses configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    Ok(toml::from_str(contents)?)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(parsed) = var("SCIROCCO_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = var("SCIROCCO_PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(db_path) = var("SCIROCCO_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("SCIROCCO_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("SCIROCCO_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(token) = var("SCIROCCO_MASTER_TOKEN").filter(|t| !t.is_empty()) {
        config.auth.master_token = token;
    }
    if let Some(parsed) = var("SCIROCCO_MAX_TRIES").and_then(|v| v.parse().ok()) {
        config.queue.max_tries = parsed;
    }
    if let Some(parsed) = var("SCIROCCO_RETRY_DELAY_SECS").and_then(|v| v.parse().ok()) {
        config.queue.retry_delay_secs = parsed;
    }
    if let Some(parsed) = var("SCIROCCO_LEASE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.queue.lease_timeout_secs = parsed;
    }
}
