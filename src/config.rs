//! Daemon configuration
//!
//! Configuration is read from a TOML file and then layered with command-line
//! overrides. The file describes the broker, process options and an ordered
//! list of handler entries:
//!
//! ```toml
//! [broker]
//! uri = "mqtt://broker.example.org:1883"
//! cache_file = "/var/cache/msg-to-handler/brokers"
//! reconnect_delay_secs = 60
//!
//! [daemon]
//! pid_file = "/run/msg-to-handler.pid"
//!
//! [[handlers]]
//! topic = "grid.probe.metricOutput.EGEE.*"
//! handler = "passive"
//! params = { command_file = "/var/nagios/rw/nagios.cmd" }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Opaque handler parameters as configured
pub type HandlerParams = HashMap<String, serde_json::Value>;

/// Top-level daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub daemon: DaemonSection,
    /// Handler entries in registration order
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
    /// Log handler verbose notes and raise the log level
    #[serde(default)]
    pub verbose: bool,
}

/// Broker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URI with scheme and port, tried first
    pub uri: Option<String>,
    /// File listing candidate broker URIs, one per line
    pub cache_file: Option<PathBuf>,
    /// Prefix for the generated client identifier
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Fixed pause between reconnect attempts
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Capacity of the client request queue
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            uri: None,
            cache_file: None,
            client_id_prefix: default_client_id_prefix(),
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_delay_secs: default_reconnect_delay(),
            request_capacity: default_request_capacity(),
        }
    }
}

impl BrokerSection {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

fn default_client_id_prefix() -> String {
    "msg-to-handler".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_reconnect_delay() -> u64 {
    60
}

fn default_request_capacity() -> usize {
    100
}

/// Process options
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DaemonSection {
    pub pid_file: Option<PathBuf>,
    /// Where stdout/stderr go once detached
    pub log_file: Option<PathBuf>,
}

/// One handler entry: topic pattern, handler kind and its parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerConfig {
    /// Literal subscription destination and local glob pattern
    pub topic: String,
    /// Handler kind identifier (`dirq`, `passive`, `log`)
    pub handler: String,
    #[serde(default)]
    pub params: HandlerParams,
}

impl HandlerConfig {
    pub fn new<T: Into<String>, H: Into<String>>(topic: T, handler: H) -> Self {
        Self {
            topic: topic.into(),
            handler: handler.into(),
            params: HandlerParams::new(),
        }
    }

    pub fn with_param<K: Into<String>, V: Into<serde_json::Value>>(mut self, key: K, value: V) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// Command-line values layered over the file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    /// Topic for the default directory-queue handler
    pub destination: Option<String>,
    /// Queue directory for the default directory-queue handler
    pub dirq: Option<PathBuf>,
    pub broker_uri: Option<String>,
    pub broker_cache: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
    pub verbose: bool,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("No broker endpoint configured (need a broker URI or a broker cache file)")]
    NoBrokerEndpoint,
    #[error("Invalid broker URI '{uri}': {reason}")]
    InvalidBrokerUri { uri: String, reason: String },
    #[error("Invalid topic pattern: {0}")]
    InvalidPattern(#[from] crate::routing::PatternError),
    #[error("Unknown handler kind: {0}")]
    UnknownHandler(String),
    #[error("Invalid parameters for handler '{handler}': {message}")]
    InvalidHandlerParams { handler: String, message: String },
    #[error("Handler '{handler}' failed to initialize: {message}")]
    HandlerInit { handler: String, message: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConfigError {
    pub fn invalid_params<H: Into<String>, M: Into<String>>(handler: H, message: M) -> Self {
        Self::InvalidHandlerParams {
            handler: handler.into(),
            message: message.into(),
        }
    }

    pub fn handler_init<H: Into<String>, M: Into<String>>(handler: H, message: M) -> Self {
        Self::HandlerInit {
            handler: handler.into(),
            message: message.into(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DaemonConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load from an optional path, falling back to well-known locations and
    /// finally to an empty configuration that the command line must complete
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let default_paths = ["msg-to-handler.toml", "/etc/msg-to-handler/msg-to-handler.toml"];
                for path_str in default_paths {
                    let path = Path::new(path_str);
                    if path.exists() {
                        return Self::load_from_file(path);
                    }
                }
                Ok(Self::default())
            }
        }
    }

    /// Apply command-line overrides; the default handler goes last
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<(), ConfigError> {
        if let Some(uri) = &overrides.broker_uri {
            self.broker.uri = Some(uri.clone());
        }
        if let Some(cache) = &overrides.broker_cache {
            self.broker.cache_file = Some(cache.clone());
        }
        if let Some(pid_file) = &overrides.pid_file {
            self.daemon.pid_file = Some(pid_file.clone());
        }
        if overrides.verbose {
            self.verbose = true;
        }

        match (&overrides.destination, &overrides.dirq) {
            (Some(destination), Some(dirq)) => {
                self.handlers.push(
                    HandlerConfig::new(destination.clone(), "dirq")
                        .with_param("dirq", dirq.display().to_string()),
                );
            }
            (Some(_), None) => {
                return Err(ConfigError::InvalidConfig(
                    "--destination requires --dirq for the default handler".to_string(),
                ));
            }
            (None, Some(_)) => {
                return Err(ConfigError::InvalidConfig(
                    "--dirq requires --destination for the default handler".to_string(),
                ));
            }
            (None, None) => {}
        }

        Ok(())
    }

    /// Structural validation; individual handler entries are checked at load
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.uri.is_none() && self.broker.cache_file.is_none() {
            return Err(ConfigError::NoBrokerEndpoint);
        }
        if self.broker.request_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "broker.request_capacity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
