//! Configuration management with hierarchical overrides using figment.
//!
//! Supports multiple configuration sources with precedence:
//! 1. Environment variables (`<COMPONENT>_*`, nested keys split on `__`)
//! 2. User configuration file (~/.config/ctrl-events/config.toml)
//! 3. System configuration file (/etc/ctrl-events/config.toml)
//! 4. Embedded defaults (lowest precedence)
//!
//! Field names are snake_case; the camelCase spellings `topicName`,
//! `brokerHost`, `brokerPort` and `useLocalSockets` are accepted as aliases.

use crate::broker::BrokerEndpoint;
use crate::names;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration format: {0}")]
    InvalidFormat(#[from] figment::Error),

    #[error("IO error reading configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

/// How to reach the broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker host name; may be omitted when local sockets are used
    #[serde(alias = "brokerHost")]
    pub broker_host: Option<String>,
    #[serde(alias = "brokerPort")]
    pub broker_port: u16,
    /// Connect through the local socket endpoint instead of TCP
    #[serde(alias = "useLocalSockets")]
    pub use_local_sockets: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_host: None,
            broker_port: names::DEFAULT_BROKER_PORT,
            use_local_sockets: false,
        }
    }
}

impl BrokerConfig {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            broker_host: Some(host.into()),
            broker_port: port,
            use_local_sockets: false,
        }
    }

    pub fn local_sockets() -> Self {
        Self {
            use_local_sockets: true,
            ..Self::default()
        }
    }

    /// Reject a configuration naming neither a host nor local sockets
    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_host = self
            .broker_host
            .as_deref()
            .is_some_and(|host| !host.trim().is_empty());
        if !has_host && !self.use_local_sockets {
            return Err(ConfigError::ValidationError {
                message: "broker_host must be set unless use_local_sockets is enabled".to_owned(),
            });
        }
        if !self.use_local_sockets && self.broker_port == 0 {
            return Err(ConfigError::ValidationError {
                message: "broker_port must be greater than 0".to_owned(),
            });
        }
        Ok(())
    }

    /// Endpoint to connect to, after validation
    pub fn endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        self.validate()?;
        match (&self.broker_host, self.use_local_sockets) {
            (_, true) => Ok(BrokerEndpoint::LocalSocket),
            (Some(host), false) => Ok(BrokerEndpoint::tcp(host.trim(), self.broker_port)),
            (None, false) => Err(ConfigError::ValidationError {
                message: "broker_host is missing".to_owned(),
            }),
        }
    }
}

/// Configuration of a transmitter or enqueuer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct TransmitterConfig {
    #[serde(alias = "topicName")]
    pub topic_name: String,
    #[serde(flatten)]
    pub broker: BrokerConfig,
}

impl TransmitterConfig {
    pub fn new(topic_name: impl Into<String>, broker: BrokerConfig) -> Self {
        Self {
            topic_name: topic_name.into(),
            broker,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic_name.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "topic_name must not be empty".to_owned(),
            });
        }
        self.broker.validate()
    }
}

/// Configuration of a receiver or dequeuer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ReceiverConfig {
    #[serde(alias = "topicName")]
    pub topic_name: String,
    #[serde(flatten)]
    pub broker: BrokerConfig,
    /// Selector expression; empty means no selector
    pub selector: Option<String>,
}

impl ReceiverConfig {
    pub fn new(topic_name: impl Into<String>, broker: BrokerConfig) -> Self {
        Self {
            topic_name: topic_name.into(),
            broker,
            selector: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic_name.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "topic_name must not be empty".to_owned(),
            });
        }
        self.broker.validate()
    }
}

/// Forwarding of tracing records as log events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Publish log records as events
    pub forward_events: bool,
    /// Topic log events are published to
    pub topic: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            forward_events: false,
            topic: names::LOGGING_TOPIC.to_owned(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub logging: LoggingConfig,
    /// Default receive timeout in milliseconds; absent means wait forever
    pub receive_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::tcp("localhost", names::DEFAULT_BROKER_PORT),
            logging: LoggingConfig::default(),
            receive_timeout_ms: None,
        }
    }
}

impl Config {
    pub fn receive_timeout(&self) -> Option<std::time::Duration> {
        self.receive_timeout_ms
            .map(std::time::Duration::from_millis)
    }

    /// Render as TOML, e.g. to write a starter configuration file
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|e| ConfigError::ValidationError {
            message: format!("unable to render configuration: {e}"),
        })
    }
}

/// Configuration loader with hierarchical override support.
pub struct ConfigLoader {
    component: String,
}

impl ConfigLoader {
    /// Create a new configuration loader for the specified component.
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_owned(),
        }
    }

    fn base_figment(&self) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        let system_config_path = Path::new("/etc/ctrl-events/config.toml");
        if system_config_path.exists() {
            figment = figment.merge(Toml::file(system_config_path));
        }

        let user_config_path = Self::user_config_path();
        if user_config_path.exists() {
            figment = figment.merge(Toml::file(&user_config_path));
        }
        figment
    }

    fn env_provider(&self) -> Env {
        Env::prefixed(&format!(
            "{}_",
            self.component.replace('-', "_").to_uppercase()
        ))
        .split("__")
    }

    /// Load configuration with hierarchical overrides using figment.
    pub fn load(&self) -> Result<Config, ConfigError> {
        let config = self.base_figment().merge(self.env_provider()).extract()?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    /// Load configuration with `path` layered over the standard files
    pub fn load_from(&self, path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let config = self
            .base_figment()
            .merge(Toml::file(path))
            .merge(self.env_provider())
            .extract()?;
        Self::validate_config(&config)?;
        Ok(config)
    }

    fn user_config_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            return config_dir.join("ctrl-events").join("config.toml");
        }

        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".config")
                .join("ctrl-events")
                .join("config.toml");
        }

        PathBuf::from("/tmp")
            .join(".config")
            .join("ctrl-events")
            .join("config.toml")
    }

    fn validate_config(config: &Config) -> Result<(), ConfigError> {
        config.broker.validate()?;
        if config.logging.topic.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "logging.topic must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_loader_default() {
        let loader = ConfigLoader::new("ctrl-events-test");
        let config = loader.load().expect("Failed to load config in test");
        assert_eq!(config.broker.broker_port, 61616);
        assert_eq!(config.logging.topic, "logging");
        assert!(config.receive_timeout().is_none());
    }

    #[test]
    fn test_broker_config_requires_host_or_local_sockets() {
        let missing = BrokerConfig::default();
        assert!(matches!(
            missing.validate(),
            Err(ConfigError::ValidationError { .. })
        ));

        let blank = BrokerConfig::tcp("  ", 61616);
        assert!(blank.validate().is_err());

        let local = BrokerConfig::local_sockets();
        assert_eq!(local.endpoint().expect("endpoint"), BrokerEndpoint::LocalSocket);

        let tcp = BrokerConfig::tcp("Broker.Example.org", 5672);
        assert_eq!(
            tcp.endpoint().expect("endpoint"),
            BrokerEndpoint::tcp("broker.example.org", 5672)
        );
    }

    #[test]
    fn test_transmitter_and_receiver_validation() {
        let config = TransmitterConfig::new("", BrokerConfig::tcp("localhost", 61616));
        assert!(config.validate().is_err());

        let config = ReceiverConfig::new("t", BrokerConfig::default());
        assert!(config.validate().is_err());

        let config = ReceiverConfig::new("t", BrokerConfig::local_sockets())
            .with_selector("RUNID = 'x'");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_camel_case_aliases() {
        let config: ReceiverConfig = serde_json::from_str(
            r#"{"topicName": "alerts", "brokerHost": "broker1", "useLocalSockets": false}"#,
        )
        .expect("parse");
        assert_eq!(config.topic_name, "alerts");
        assert_eq!(config.broker.broker_host.as_deref(), Some("broker1"));
        assert_eq!(config.broker.broker_port, 61616);
        assert!(config.selector.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
receive_timeout_ms = 250

[broker]
broker_host = "events.example.org"
broker_port = 61617

[logging]
forward_events = true
"#
        )
        .expect("write");

        let loader = ConfigLoader::new("ctrl-events-test");
        let config = loader.load_from(file.path()).expect("load");
        assert_eq!(
            config.broker.broker_host.as_deref(),
            Some("events.example.org")
        );
        assert_eq!(config.broker.broker_port, 61617);
        assert!(config.logging.forward_events);
        assert_eq!(config.logging.level, "info");
        assert_eq!(
            config.receive_timeout(),
            Some(std::time::Duration::from_millis(250))
        );
    }

    #[test]
    fn test_load_from_missing_file() {
        let loader = ConfigLoader::new("ctrl-events-test");
        let result = loader.load_from(Path::new("/nonexistent/ctrl-events.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let rendered = config.to_toml().expect("render");
        let parsed: Config = toml::from_str(&rendered).expect("parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_config_error_display() {
        let errors = vec![
            ConfigError::ValidationError {
                message: "test error".to_owned(),
            },
            ConfigError::IoError(std::io::Error::other("test error")),
        ];

        for error in errors {
            let error_string = format!("{error}");
            assert!(!error_string.is_empty());
        }
    }
}
