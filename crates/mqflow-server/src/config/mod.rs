//! Broker delivery configuration.
//!
//! Supports configuration from:
//! - TOML file (default: `mqflow.toml`)
//! - Environment variables with `MQFLOW__` prefix (double underscore for nesting)
//! - In-file variable substitution: `${VAR}` or `${VAR:-default}`
//!
//! Environment variable examples:
//! - `MQFLOW__LIMITS__MAX_QUEUED_MESSAGES=5000`
//! - `MQFLOW__MQTT__MAX_QOS=1`
//!
//! In-file substitution examples:
//! ```toml
//! [limits]
//! max_inflight_messages = "${MQFLOW_INFLIGHT:-20}"
//! ```

mod limits;
mod log;
mod mqtt;

use std::path::Path;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

pub use limits::{LimitsConfig, DEFAULT_MAX_INFLIGHT_MESSAGES, DEFAULT_MAX_QUEUED_MESSAGES};
pub use log::LogConfig;
pub use mqtt::MqttConfig;

/// Highest node id assignable to a broker sharing a persistence backend.
pub const MAX_NODE_ID: u16 = 1023;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration.
    pub log: LogConfig,
    /// Queue and inflight limits.
    pub limits: LimitsConfig,
    /// MQTT feature configuration.
    pub mqtt: MqttConfig,
    /// Broker node id (0-1023), embedded in every stored message id so
    /// brokers sharing a persistence backend never collide.
    pub node_id: u16,
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    Io(std::io::Error),
    /// Config parsing/loading error.
    Config(config::ConfigError),
    /// Invalid configuration value.
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `MQFLOW__` prefix with double underscores for nesting.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .set_default("log.level", "info")?
            .set_default(
                "limits.max_inflight_messages",
                DEFAULT_MAX_INFLIGHT_MESSAGES as i64,
            )?
            .set_default("limits.max_inflight_bytes", 0)?
            .set_default(
                "limits.max_queued_messages",
                DEFAULT_MAX_QUEUED_MESSAGES as i64,
            )?
            .set_default("limits.max_queued_bytes", 0)?
            .set_default("limits.queue_qos0_messages", false)?
            .set_default("mqtt.max_qos", 2)?
            .set_default("mqtt.retain_available", true)?
            .set_default("mqtt.allow_duplicate_messages", false)?
            .set_default("node_id", 0)?;

        // Load from file with env var substitution
        let path = path.as_ref();
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    let substituted = substitute_env_vars(&content);
                    builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
                }
                Err(e) => return Err(ConfigError::Io(e)),
            }
        }

        // Override with environment variables (MQFLOW__LIMITS__MAX_QUEUED_MESSAGES, etc.)
        let cfg = builder
            .add_source(
                Environment::with_prefix("MQFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only (no file).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a TOML string (for testing).
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let substituted = substitute_env_vars(content);
        let config: Config = toml::from_str(&substituted)
            .map_err(|e| ConfigError::Validation(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log.validate().map_err(ConfigError::Validation)?;
        self.mqtt.validate().map_err(ConfigError::Validation)?;
        if self.node_id > MAX_NODE_ID {
            return Err(ConfigError::Validation(format!(
                "node_id must be 0-{}",
                MAX_NODE_ID
            )));
        }
        Ok(())
    }
}
