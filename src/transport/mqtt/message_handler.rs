//! Pure message routing and processing logic for MQTT events
//!
//! Maps raw rumqttc events to [`EventRoute`]s and forwards inbound traffic to
//! the single consumer of the transport's event channel.

use crate::transport::InboundEvent;
use rumqttc::v5::mqttbytes::v5::{Filter, Packet};
use rumqttc::v5::{mqttbytes::QoS, Event};
use rumqttc::Outgoing;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    filter_count: suback.return_codes.len(),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Disconnect) => EventRoute::DisconnectSent,
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Every subscription and publish is at-least-once
    pub fn delivery_qos() -> QoS {
        QoS::AtLeastOnce
    }

    /// Subscription filters for the configured topic list, deduplicated in order
    pub fn build_subscription_filters(topics: &[String]) -> Vec<Filter> {
        let mut seen: Vec<&str> = Vec::with_capacity(topics.len());
        topics
            .iter()
            .filter(|topic| {
                if seen.contains(&topic.as_str()) {
                    false
                } else {
                    seen.push(topic.as_str());
                    true
                }
            })
            .map(|topic| Filter::new(topic.clone(), Self::delivery_qos()))
            .collect()
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged, (re-)subscribe now
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker closed the connection
    Disconnected,
    SubscriptionConfirmed { packet_id: u16, filter_count: usize },
    /// Our own DISCONNECT went out; the event loop can stop
    DisconnectSent,
    /// PingResp, PubAck and friends
    InfrastructureEvent(String),
    OutgoingEvent,
}

/// Forwards inbound events into the router channel (impure I/O)
///
/// Clones share the same sender slot, so a sender installed after the
/// supervisor task was spawned is still picked up.
#[derive(Clone, Default)]
pub struct MessageForwarder {
    sender: Arc<Mutex<Option<mpsc::Sender<InboundEvent>>>>,
}

impl MessageForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sender(&self, sender: mpsc::Sender<InboundEvent>) {
        *self.lock() = Some(sender);
    }

    /// Drop the sender so the receiving side sees the channel close
    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn has_sender(&self) -> bool {
        self.lock().is_some()
    }

    /// Forward one event, waiting for channel capacity
    pub async fn forward(&self, event: InboundEvent) -> Result<(), String> {
        let sender = self.lock().clone();
        match sender {
            Some(sender) => sender
                .send(event)
                .await
                .map_err(|e| format!("Failed to forward inbound event: {e}")),
            None => {
                warn!("Inbound event dropped, no event sender configured");
                Err("No event sender configured".to_string())
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<InboundEvent>>> {
        self.sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for MessageForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageForwarder")
            .field("has_sender", &self.has_sender())
            .finish()
    }
}

/// Log helper for events the supervisor does not act on
pub(crate) fn log_ignored_route(route: &EventRoute) {
    match route {
        EventRoute::SubscriptionConfirmed {
            packet_id,
            filter_count,
        } => {
            debug!(target: "mqtt_transport", packet_id, filter_count, "Subscription confirmed");
        }
        EventRoute::InfrastructureEvent(event) => {
            debug!(target: "mqtt_transport", "MQTT event: {}", event);
        }
        _ => {}
    }
}
