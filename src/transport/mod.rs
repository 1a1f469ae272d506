//! Transport layer for the fleet feed
//!
//! [`Transport`] abstracts the broker connection so the session, the command
//! publisher and the tests can run against either the real MQTT client or a
//! stub. Inbound traffic leaves a transport only through the event channel
//! installed with [`Transport::set_event_sender`].

use crate::observability::metrics;
use crate::protocol::{codec, MessageEnvelope};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

pub mod mqtt;

pub use mqtt::{ConnectionStatus, TransportError};

/// Events a transport emits towards the topic router, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Connection status changed
    Status(ConnectionStatus),
    /// Raw message from a subscribed topic
    Message { topic: String, payload: Vec<u8> },
    /// Connection-level failure; a status change follows
    TransportError(String),
    /// Reconnection attempts exhausted, the transport has stopped for good
    Terminated { attempts: u32 },
}

/// Result of a publish request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Handed to the client for at-least-once delivery
    Sent,
    /// Skipped because the connection was not up
    NotConnected(ConnectionStatus),
}

impl PublishOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, PublishOutcome::Sent)
    }
}

/// Transport trait for the fleet feed
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting. Calling this while a connection is active is a no-op.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the connection. After this returns no further message events
    /// are emitted, a final [`InboundEvent::Status`] has been sent, and the
    /// event sender has been released.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Publish raw bytes at-least-once, without retention
    async fn publish(&self, topic: &str, payload: Vec<u8>)
        -> Result<PublishOutcome, TransportError>;

    fn connection_status(&self) -> ConnectionStatus;

    /// True once reconnection attempts have been exhausted
    fn is_permanently_disconnected(&self) -> bool;

    /// Install the channel inbound events are forwarded to
    fn set_event_sender(&self, sender: mpsc::Sender<InboundEvent>);

    /// Flag raised by [`Transport::disconnect`]; consumers stop applying
    /// message events once it reads `true`
    fn shutdown_signal(&self) -> watch::Receiver<bool>;
}

/// Serialize an envelope and publish it, or skip with a warning when the
/// connection is not up. Skipping is not an error.
pub async fn publish_envelope<T, P>(
    transport: &T,
    topic: &str,
    envelope: &MessageEnvelope<P>,
) -> Result<PublishOutcome, TransportError>
where
    T: Transport + ?Sized,
    P: Serialize + Sync,
{
    let status = transport.connection_status();
    if !status.is_connected() {
        warn!(topic = %topic, status = %status, "Not connected, publish skipped");
        metrics::metrics().mqtt_publish_skipped();
        return Ok(PublishOutcome::NotConnected(status));
    }

    let payload = codec::encode(envelope)?;
    let outcome = transport.publish(topic, payload).await.map_err(|e| {
        warn!(topic = %topic, error = %e, "Publish failed");
        metrics::metrics().mqtt_publish_failed();
        e
    })?;
    match outcome {
        PublishOutcome::Sent => {
            debug!(topic = %topic, seq = envelope.seq, "Published envelope");
            metrics::metrics().mqtt_message_published();
        }
        PublishOutcome::NotConnected(status) => {
            warn!(topic = %topic, status = %status, "Connection dropped, publish skipped");
            metrics::metrics().mqtt_publish_skipped();
        }
    }
    Ok(outcome)
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
