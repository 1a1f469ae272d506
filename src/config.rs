//! Configuration for the fleet ingestion service
//!
//! Loaded from a TOML file. Every field except `mqtt.broker_url` has a default,
//! and credentials are named by environment variable, resolved at connect time.

use crate::protocol::topics;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    #[serde(default)]
    pub dashboard: DashboardSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub api: ApiSection,
}

/// Identity of this dashboard instance on the broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardSection {
    /// `source` stamped on outbound command envelopes
    #[serde(default = "default_source_id")]
    pub source_id: String,
    /// Client ids are `{prefix}-{uuid}`, fresh per connection
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

impl Default for DashboardSection {
    fn default() -> Self {
        Self {
            source_id: default_source_id(),
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT broker URL with protocol and port; `mqtts://` enables TLS
    pub broker_url: String,
    /// Environment variable containing username
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable containing password
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Fixed delay between reconnection attempts
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Attempts allowed before the connection is given up for good
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "topics::default_subscriptions")]
    pub subscriptions: Vec<String>,
}

impl MqttSection {
    /// Section with defaults for everything but the broker
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            subscriptions: topics::default_subscriptions(),
        }
    }
}

/// HTTP read/health API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSection {
    /// Listen port, 0 disables the server
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

fn default_source_id() -> String {
    "dashboard".to_string()
}

fn default_client_id_prefix() -> String {
    "aetheris-dashboard".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_interval_ms() -> u64 {
    5_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_api_port() -> u16 {
    8080
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to render TOML: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FleetConfig {
    /// Configuration for a broker with every other setting defaulted
    pub fn for_broker(broker_url: impl Into<String>) -> Self {
        Self {
            dashboard: DashboardSection::default(),
            mqtt: MqttSection::new(broker_url),
            api: ApiSection::default(),
        }
    }

    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mqtt.broker_url.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.broker_url cannot be empty".to_string(),
            ));
        }
        if self.mqtt.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.reconnect_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.reconnect_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.max_reconnect_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.max_reconnect_attempts must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.subscriptions.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.subscriptions must list at least one topic filter".to_string(),
            ));
        }
        if self.dashboard.source_id.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "dashboard.source_id cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Get MQTT username from environment variable
    pub fn get_mqtt_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.username_env.as_ref())
    }

    /// Get MQTT password from environment variable
    pub fn get_mqtt_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.mqtt.password_env.as_ref())
    }
}
