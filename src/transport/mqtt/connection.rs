//! Pure connection state management for MQTT client
//!
//! Connection status, reconnection policy, transport errors and broker option
//! building. Nothing here performs I/O.

use crate::config::MqttSection;
use crate::protocol::{CodecError, TopicError};
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Process-wide broker connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        ConnectionStatus::Disconnected
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reconnection policy: a fixed interval between attempts and a hard cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub interval_ms: u64,
    /// Attempts allowed after a connection loss; exceeding it is terminal
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    pub fn from_section(config: &MqttSection) -> Self {
        Self {
            interval_ms: config.reconnect_interval_ms,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before the given attempt. The interval is fixed, so the attempt
    /// number does not change it.
    pub fn delay_for_attempt(&self, _attempt: u32) -> u64 {
        self.interval_ms
    }

    /// Upper bound on time spent retrying before giving up
    pub fn max_total_time(&self) -> u64 {
        self.interval_ms.saturating_mul(u64::from(self.max_attempts))
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error")]
    Serialization(#[from] CodecError),
    #[error("Invalid topic segment")]
    InvalidTopic(#[from] TopicError),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("No connection confirmed within {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },
    #[error("Connection abandoned after {attempts} reconnection attempts")]
    PermanentlyDisconnected { attempts: u32 },
}

/// Build broker options from config
///
/// Every call generates a fresh client id, so a reconnect never collides with a
/// stale session the broker still holds. Clean start is always on: nothing
/// queued while disconnected survives.
pub fn configure_mqtt_options(
    client_id_prefix: &str,
    config: &MqttSection,
) -> Result<MqttOptions, TransportError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| TransportError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(TransportError::InvalidBrokerUrl(config.broker_url.clone())),
    };

    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    let client_id = generate_client_id(client_id_prefix);
    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username_env) = &config.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = config
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(&username, &password);
        }
    }

    // rumqttc rejects keep alive below 5s
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
    // Whole seconds only; the supervisor enforces the exact deadline
    mqtt_options.set_connection_timeout(config.connect_timeout_ms.div_ceil(1000).max(1));
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    Ok(mqtt_options)
}

/// `{prefix}-{uuid}`
pub fn generate_client_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}
