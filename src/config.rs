//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::realtime::HubConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults plus overrides read through `lookup`, validated
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_overrides(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations or environment
    ///
    /// Nothing is logged here since tracing is configured from the result;
    /// the caller reports [`LoadedConfig::source`] and the skipped files.
    pub fn load_default() -> Result<LoadedConfig, ConfigError> {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("groovegarden").join("hub.toml")),
            Some(PathBuf::from("/etc/groovegarden/hub.toml")),
            Some(PathBuf::from("./hub.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths, Self::load_with_env, Self::from_env)
    }

    /// First of `paths` that loads, otherwise `fallback`
    fn load_first(
        paths: &[PathBuf],
        load: impl Fn(&Path) -> Result<Self, ConfigError>,
        fallback: impl FnOnce() -> Result<Self, ConfigError>,
    ) -> Result<LoadedConfig, ConfigError> {
        let mut skipped = Vec::new();

        for path in paths.iter().filter(|p| p.exists()) {
            match load(path) {
                Ok(config) => {
                    return Ok(LoadedConfig {
                        config,
                        source: ConfigSource::File(path.clone()),
                        skipped,
                    })
                }
                Err(e) => skipped.push(e),
            }
        }

        Ok(LoadedConfig {
            config: fallback()?,
            source: ConfigSource::Environment,
            skipped,
        })
    }

    /// Reject values the hub cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hub.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "hub.queue_capacity must be greater than 0".to_string(),
            ));
        }
        if self.hub.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "hub.write_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.hub.drain_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "hub.drain_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Server overrides (SERVER_PORT is the legacy backend variable)
        if let Some(host) = lookup("GROOVEGARDEN_HOST") {
            self.server.host = host;
        }
        let port = lookup("GROOVEGARDEN_PORT").or_else(|| lookup("SERVER_PORT"));
        if let Some(Ok(p)) = port.map(|p| p.parse::<u16>()) {
            self.server.port = p;
        }

        // Hub overrides
        if let Some(Ok(c)) = lookup("GROOVEGARDEN_QUEUE_CAPACITY").map(|c| c.parse::<usize>()) {
            self.hub.queue_capacity = c;
        }
        if let Some(Ok(t)) = lookup("GROOVEGARDEN_WRITE_TIMEOUT_MS").map(|t| t.parse::<u64>()) {
            self.hub.write_timeout_ms = t;
        }

        // Logging overrides
        if let Some(level) = lookup("GROOVEGARDEN_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("GROOVEGARDEN_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Where [`Config::load_default`] found its configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No usable file; defaults plus environment overrides
    Environment,
}

/// Result of searching the default config locations
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub source: ConfigSource,
    /// Files that existed but failed to load or validate
    pub skipped: Vec<ConfigError>,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# GrooveGarden Realtime Hub Configuration
#
# Environment variables override these settings:
# - GROOVEGARDEN_HOST
# - GROOVEGARDEN_PORT (or SERVER_PORT)
# - GROOVEGARDEN_QUEUE_CAPACITY
# - GROOVEGARDEN_WRITE_TIMEOUT_MS
# - GROOVEGARDEN_LOG_LEVEL
# - GROOVEGARDEN_LOG_FORMAT

[hub]
# Events waiting for delivery before the overflow policy applies
queue_capacity = 1024

# drop_oldest: evict the oldest queued event
# drop_newest: discard the event being published
overflow_policy = "drop_oldest"

# Deadline for one write to one client (ms)
write_timeout_ms = 2000

# How long shutdown waits for queued events (ms)
drain_timeout_ms = 5000

# Maximum simultaneous WebSocket clients (0 = unlimited)
max_connections = 0

[server]
host = "0.0.0.0"
port = 8081

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
