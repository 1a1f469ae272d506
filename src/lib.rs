//! AETHERIS fleet ingestion core
//!
//! Real-time telemetry ingestion and synchronization for a fleet of
//! autonomous pipeline-inspection robots (rovers, drones, in-pipe crawlers)
//! that report over MQTT.
//!
//! # Overview
//!
//! - [`protocol`]: payload and envelope types, topic naming, two-stage decoding
//! - [`transport`]: the MQTT connection lifecycle with bounded fixed-interval
//!   reconnection, behind the [`transport::Transport`] trait
//! - [`routing`]: the topic router that applies inbound messages in delivery order
//! - [`fleet`]: the fleet state store and its read views
//! - [`commands`]: outbound robot commands
//! - [`session`]: wiring of store, router and transport for one run
//! - [`observability`]: logging, metrics and the HTTP read/health API
//!
//! # Quick Start
//!
//! ```rust
//! use aetheris_fleet::fleet::FleetStore;
//! use aetheris_fleet::protocol::{Heartbeat, MessageEnvelope, RobotState, RobotType};
//! use aetheris_fleet::routing::TopicRouter;
//!
//! let store = FleetStore::new();
//! let router = TopicRouter::new(store.clone());
//!
//! let mut rover = RobotState::new("RV-001", "Rover Alpha", RobotType::Rover);
//! rover.battery = 87.0;
//! let payload = serde_json::to_vec(&MessageEnvelope::new(rover, "RV-001", 1)).unwrap();
//! router.route("aetheris/telemetry/RV-001", &payload);
//!
//! let heartbeat = serde_json::to_vec(&Heartbeat::new("RV-001", 5000)).unwrap();
//! router.route("aetheris/heartbeat/RV-001", &heartbeat);
//!
//! assert_eq!(store.robot("RV-001").map(|r| r.battery), Some(87.0));
//! assert_eq!(store.heartbeat("RV-001"), Some(5000));
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod fleet;
pub mod observability;
pub mod protocol;
pub mod routing;
pub mod session;
pub mod testing;
pub mod transport;

pub use commands::CommandPublisher;
pub use config::{ConfigError, FleetConfig};
pub use error::{FleetError, FleetResult};
pub use fleet::{FleetSnapshot, FleetStore, FleetSummary};
pub use routing::{RouteOutcome, TopicRouter};
pub use session::{FleetSession, SessionError};
pub use transport::mqtt::MqttClient;
pub use transport::{ConnectionStatus, InboundEvent, PublishOutcome, Transport, TransportError};
