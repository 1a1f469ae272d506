//! MQTT client for the AETHERIS fleet feed
//!
//! Pure functions are kept apart from I/O:
//!
//! - [`connection`] - connection status, reconnection policy, broker options
//! - [`message_handler`] - rumqttc event routing and event forwarding
//! - [`health_monitor`] - lifecycle state machine and reconnection decisions
//! - [`client`] - the supervisor task and the [`MqttClient`] handle
//!
//! # Usage
//!
//! ```rust,no_run
//! use aetheris_fleet::config::MqttSection;
//! use aetheris_fleet::transport::mqtt::MqttClient;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let config = MqttSection::new("mqtt://localhost:1883");
//! let mut client = MqttClient::new("aetheris-dashboard", config)?;
//! client.connect().await?;
//! client.wait_until_connected(Duration::from_secs(10)).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{ConnectionStatus, ReconnectConfig, TransportError};
pub use health_monitor::{
    ConnectionEvent, HealthMetrics, HealthMonitor, LifecycleTracker, ReconnectionDecision,
};
pub use message_handler::{EventRoute, MessageForwarder, MessageHandler};
