//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub announce: AnnounceConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
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
    8087
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

/// Push hub configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_push_enabled")]
    pub enabled: bool,

    #[serde(default = "default_events_topic")]
    pub events_topic: String,

    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,

    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,
}

fn default_push_enabled() -> bool {
    true
}

fn default_events_topic() -> String {
    "beacon.events".to_string()
}

fn default_command_capacity() -> usize {
    256
}

fn default_session_buffer() -> usize {
    64
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: default_push_enabled(),
            events_topic: default_events_topic(),
            command_capacity: default_command_capacity(),
            session_buffer: default_session_buffer(),
        }
    }
}

/// Service announcement configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AnnounceConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_announce_topic")]
    pub topic: String,

    #[serde(default = "default_announce_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_announce_name")]
    pub name: String,

    #[serde(default)]
    pub prefix: String,

    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub push_endpoint: String,
}

fn default_announce_topic() -> String {
    "beacon.services".to_string()
}

fn default_announce_interval() -> u64 {
    5
}

fn default_announce_name() -> String {
    "beacon".to_string()
}

impl Default for AnnounceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: default_announce_topic(),
            interval_secs: default_announce_interval(),
            name: default_announce_name(),
            prefix: String::new(),
            endpoint: String::new(),
            push_endpoint: String::new(),
        }
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

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("beacon").join("config.toml")),
            Some(PathBuf::from("/etc/beacon/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Server overrides
        if let Ok(host) = std::env::var("BEACON_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("BEACON_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        // Push overrides
        if let Ok(enabled) = std::env::var("BEACON_PUSH_ENABLED") {
            self.push.enabled = enabled.to_lowercase() != "false" && enabled != "0";
        }
        if let Ok(topic) = std::env::var("BEACON_EVENTS_TOPIC") {
            self.push.events_topic = topic;
        }

        // Announce overrides
        if let Ok(enabled) = std::env::var("BEACON_ANNOUNCE_ENABLED") {
            self.announce.enabled = enabled.to_lowercase() != "false" && enabled != "0";
        }
        if let Ok(topic) = std::env::var("BEACON_ANNOUNCE_TOPIC") {
            self.announce.topic = topic;
        }
        if let Ok(name) = std::env::var("BEACON_ANNOUNCE_NAME") {
            self.announce.name = name;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("BEACON_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("BEACON_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            push: PushConfig::default(),
            announce: AnnounceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Beacon Configuration
#
# Environment variables override these settings:
# - BEACON_HOST
# - BEACON_PORT
# - BEACON_PUSH_ENABLED
# - BEACON_EVENTS_TOPIC
# - BEACON_ANNOUNCE_ENABLED
# - BEACON_ANNOUNCE_TOPIC
# - BEACON_ANNOUNCE_NAME
# - BEACON_LOG_LEVEL
# - BEACON_LOG_FORMAT

[server]
# HTTP server host
host = "0.0.0.0"

# HTTP server port
port = 8087

[push]
# Enable the push hub and the /events endpoint
enabled = true

# Topic events travel on when a distributed backend is configured
events_topic = "beacon.events"

# Capacity of the hub command channel
command_capacity = 256

# Outbound frame buffer per session
session_buffer = 64

[announce]
# Enable periodic service announcements
enabled = false

# Topic announcements are published on
topic = "beacon.services"

# Seconds between hello announcements
interval_secs = 5

# Instance name (part of the gateway routing key)
name = "beacon"

# Optional routing prefix; the gateway key becomes "prefix/name"
prefix = ""

# Reachable API endpoint advertised to the gateway
endpoint = ""

# Reachable push endpoint advertised to the gateway
push_endpoint = ""

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.push.enabled);
        assert!(!config.announce.enabled);
        assert_eq!(config.push.events_topic, "beacon.events");
        assert_eq!(config.server.addr(), "0.0.0.0:8087");
    }

    #[test]
    fn test_generated_config_parses_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(generate_default_config().as_bytes())
            .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.announce.interval_secs, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[server]\nport = 9000\n").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.push.enabled);
    }

    #[test]
    fn test_malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not toml at all [").unwrap();

        assert!(matches!(
            Config::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }
}
