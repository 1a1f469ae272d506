//! Topic router: inbound MQTT traffic to fleet store mutations
//!
//! The router is the only consumer of the transport's event channel. Each
//! event is applied to the [`FleetStore`] synchronously before the next one
//! is received, so two messages are never applied concurrently and state
//! reflects broker delivery order.

use crate::fleet::FleetStore;
use crate::observability::metrics;
use crate::protocol::codec::{self, CodecError, FleetMessage};
use crate::protocol::{classify_topic, MessageKind};
use crate::transport::InboundEvent;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// What happened to one inbound message
#[derive(Debug)]
pub enum RouteOutcome {
    /// Decoded and written to the store
    Applied(MessageKind),
    /// Topic not consumed by this service
    Ignored,
    /// Payload could not be decoded; the message was dropped
    Rejected(CodecError),
    /// Arrived after disconnect was requested; the message was dropped
    Discarded,
}

impl RouteOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, RouteOutcome::Applied(_))
    }
}

/// Routes decoded messages into a [`FleetStore`]
pub struct TopicRouter {
    store: FleetStore,
    terminated: watch::Sender<Option<u32>>,
}

impl TopicRouter {
    pub fn new(store: FleetStore) -> Self {
        let (terminated, _) = watch::channel(None);
        Self { store, terminated }
    }

    pub fn store(&self) -> &FleetStore {
        &self.store
    }

    /// Resolves to `Some(attempts)` once the transport reports that it gave
    /// up reconnecting
    pub fn termination(&self) -> watch::Receiver<Option<u32>> {
        self.terminated.subscribe()
    }

    /// Classify, decode and apply one message
    ///
    /// Never fails: unknown topics are ignored and bad payloads are logged and
    /// dropped, leaving the store untouched.
    pub fn route(&self, topic: &str, payload: &[u8]) -> RouteOutcome {
        metrics::metrics().message_received();

        let Some(inbound) = classify_topic(topic) else {
            debug!(topic = %topic, "Ignoring message on unhandled topic");
            metrics::metrics().message_ignored();
            return RouteOutcome::Ignored;
        };
        let kind = inbound.kind();

        match codec::decode(kind, payload) {
            Ok(message) => {
                self.apply(topic, message);
                metrics::metrics().message_applied(kind);
                RouteOutcome::Applied(kind)
            }
            Err(e) => {
                if e.is_schema_mismatch() {
                    metrics::metrics().schema_mismatch();
                } else {
                    metrics::metrics().decode_error();
                }
                warn!(
                    topic = %topic,
                    kind = %kind,
                    payload_len = payload.len(),
                    error = %e,
                    "Dropping undecodable message"
                );
                RouteOutcome::Rejected(e)
            }
        }
    }

    fn apply(&self, topic: &str, message: FleetMessage) {
        match message {
            FleetMessage::Telemetry(envelope) => {
                let state = envelope.into_payload();
                debug!(robot_id = %state.id, battery = state.battery, "Applying telemetry");
                self.store.update_robot(state);
            }
            FleetMessage::Heartbeat(heartbeat) => {
                debug!(robot_id = %heartbeat.robot_id, timestamp = heartbeat.timestamp, "Applying heartbeat");
                self.store
                    .update_heartbeat(&heartbeat.robot_id, heartbeat.timestamp);
            }
            FleetMessage::Alert(envelope) => {
                let report = envelope.into_payload();
                debug!(alert_id = %report.id, severity = ?report.severity, "Applying alert");
                if let Some(evicted) = self.store.add_alert(report) {
                    debug!(alert_id = %evicted.id, "Oldest alert evicted");
                }
            }
            FleetMessage::Environment(envelope) => {
                let reading = envelope.into_payload();
                debug!(topic = %topic, section_id = %reading.section_id, "Applying environment reading");
                if reading.is_hazardous() {
                    warn!(
                        section_id = %reading.section_id,
                        h2_ppm = reading.h2_concentration,
                        pressure_bar = reading.pressure,
                        temperature_c = reading.temperature,
                        "Hazardous environment reading"
                    );
                }
                self.store.update_environment(reading);
            }
        }
    }

    /// Apply one transport event
    ///
    /// Status changes are always applied so the final `disconnected` status
    /// lands. Messages are discarded once `cancelled` is set.
    pub fn handle_event(&self, event: InboundEvent, cancelled: bool) -> Option<RouteOutcome> {
        match event {
            InboundEvent::Status(status) => {
                info!(status = %status, "Connection status changed");
                self.store.set_connection_status(status);
                None
            }
            InboundEvent::Message { topic, payload } => {
                if cancelled {
                    debug!(topic = %topic, "Discarding message received after disconnect");
                    metrics::metrics().message_discarded();
                    return Some(RouteOutcome::Discarded);
                }
                Some(self.route(&topic, &payload))
            }
            InboundEvent::TransportError(message) => {
                error!(error = %message, "MQTT transport error");
                None
            }
            InboundEvent::Terminated { attempts } => {
                error!(attempts, "Reconnection attempts exhausted, connection terminated");
                self.terminated.send_replace(Some(attempts));
                None
            }
        }
    }

    /// Consume events until the transport releases the channel
    pub async fn run(self, mut rx: mpsc::Receiver<InboundEvent>, shutdown: watch::Receiver<bool>) {
        info!("Topic router started");
        while let Some(event) = rx.recv().await {
            let cancelled = *shutdown.borrow();
            self.handle_event(event, cancelled);
        }
        info!("Topic router stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        AnomalyReport, AnomalyType, Heartbeat, MessageEnvelope, PipeEnvironment, Position,
        RobotState, RobotType, SeverityLevel,
    };
    use crate::transport::ConnectionStatus;

    fn router() -> TopicRouter {
        TopicRouter::new(FleetStore::new())
    }

    fn telemetry(id: &str, battery: f64) -> Vec<u8> {
        let mut state = RobotState::new(id, "Rover Alpha", RobotType::Rover);
        state.battery = battery;
        serde_json::to_vec(&MessageEnvelope::new(state, id, 1)).unwrap()
    }

    fn alert(id: &str) -> Vec<u8> {
        alert_flagged(id, false)
    }

    fn alert_flagged(id: &str, acknowledged: bool) -> Vec<u8> {
        let report = AnomalyReport {
            id: id.to_string(),
            anomaly_type: AnomalyType::Leak,
            severity: SeverityLevel::High,
            position: Position::new(10.0, 0.0, 0.0),
            section_id: "PIPE-001".to_string(),
            detected_by: "DR-002".to_string(),
            confidence: 0.92,
            description: "H2 leak".to_string(),
            timestamp: 1000,
            acknowledged,
        };
        serde_json::to_vec(&MessageEnvelope::new(report, "DR-002", 2)).unwrap()
    }

    #[test]
    fn test_routes_telemetry() {
        let router = router();
        let outcome = router.route("aetheris/telemetry/RV-001", &telemetry("RV-001", 87.0));
        assert!(matches!(outcome, RouteOutcome::Applied(MessageKind::Telemetry)));
        assert_eq!(router.store().robot("RV-001").map(|r| r.battery), Some(87.0));
    }

    #[test]
    fn test_malformed_telemetry_is_dropped() {
        let router = router();
        let outcome = router.route("aetheris/telemetry/RV-001", b"{not json");
        assert!(matches!(outcome, RouteOutcome::Rejected(CodecError::Decode(_))));
        assert_eq!(router.store().robot_count(), 0);
    }

    #[test]
    fn test_wrong_shape_is_schema_mismatch() {
        let router = router();
        let outcome = router.route("aetheris/telemetry/RV-001", br#"{"hello": "world"}"#);
        match outcome {
            RouteOutcome::Rejected(e) => assert!(e.is_schema_mismatch()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(router.store().robot_count(), 0);
    }

    #[test]
    fn test_heartbeat_touches_only_heartbeats() {
        let router = router();
        let payload = serde_json::to_vec(&Heartbeat::new("DR-002", 1000)).unwrap();
        let before = router.store().revision();

        assert!(router.route("aetheris/heartbeat/DR-002", &payload).is_applied());

        let snapshot = router.store().snapshot();
        assert_eq!(snapshot.heartbeats.get("DR-002"), Some(&1000));
        assert!(snapshot.robots.is_empty());
        assert!(snapshot.alerts.is_empty());
        assert!(snapshot.environment.is_empty());
        assert_eq!(router.store().revision(), before + 1);
    }

    #[test]
    fn test_unknown_topics_are_ignored() {
        let router = router();
        for topic in [
            "aetheris/responses/RV-001",
            "aetheris/system/status",
            "aetheris/telemetry",
            "aetheris/telemetry/RV-001/extra",
            "other/telemetry/RV-001",
        ] {
            assert!(matches!(router.route(topic, b"{}"), RouteOutcome::Ignored));
        }
        assert_eq!(router.store().revision(), 0);
    }

    #[test]
    fn test_environment_reading() {
        let router = router();
        let reading = PipeEnvironment {
            section_id: "PIPE-003".to_string(),
            pressure: 120.0,
            temperature: 25.0,
            h2_concentration: 50.0,
            wall_thickness: 12.0,
            flow_rate: 300.0,
            humidity: 40.0,
            position: Position::origin(),
            timestamp: 10,
        };
        let payload = serde_json::to_vec(&MessageEnvelope::new(reading, "sensor", 3)).unwrap();

        assert!(router.route("aetheris/environment/PIPE-003", &payload).is_applied());
        assert_eq!(router.store().snapshot().hazardous_sections().len(), 1);
    }

    #[test]
    fn test_broker_cannot_set_acknowledged() {
        let router = router();
        assert!(router.route("aetheris/alerts", &alert("a1")).is_applied());
        assert!(router
            .route("aetheris/alerts", &alert_flagged("a1", true))
            .is_applied());

        let alerts = router.store().alerts();
        assert_eq!(alerts.len(), 1);
        assert!(!alerts[0].acknowledged);
        assert_eq!(router.store().snapshot().unacknowledged_alerts().count(), 1);

        assert!(router.route("aetheris/alerts", &alert_flagged("a2", true)).is_applied());
        assert!(router.store().alerts().iter().all(|a| !a.acknowledged));
    }

    #[test]
    fn test_end_to_end_sequence() {
        let router = router();
        router.route("aetheris/telemetry/RV-001", &telemetry("RV-001", 87.0));
        router.route(
            "aetheris/heartbeat/RV-001",
            &serde_json::to_vec(&Heartbeat::new("RV-001", 5000)).unwrap(),
        );
        router.route("aetheris/alerts", &alert("a1"));

        let store = router.store();
        assert_eq!(store.robot("RV-001").map(|r| r.battery), Some(87.0));
        assert_eq!(store.heartbeat("RV-001"), Some(5000));
        let ids: Vec<String> = store.alerts().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a1"]);
    }

    #[test]
    fn test_cancelled_messages_are_discarded_but_status_applies() {
        let router = router();
        let outcome = router.handle_event(
            InboundEvent::Message {
                topic: "aetheris/telemetry/RV-001".to_string(),
                payload: telemetry("RV-001", 50.0),
            },
            true,
        );
        assert!(matches!(outcome, Some(RouteOutcome::Discarded)));
        assert_eq!(router.store().robot_count(), 0);

        router.handle_event(InboundEvent::Status(ConnectionStatus::Connected), true);
        assert_eq!(router.store().connection_status(), ConnectionStatus::Connected);
    }

    #[test]
    fn test_termination_is_reported() {
        let router = router();
        let termination = router.termination();
        assert_eq!(*termination.borrow(), None);

        router.handle_event(InboundEvent::Terminated { attempts: 10 }, false);
        assert_eq!(*termination.borrow(), Some(10));
    }

    #[tokio::test]
    async fn test_run_applies_in_order_until_channel_closes() {
        let store = FleetStore::new();
        let router = TopicRouter::new(store.clone());
        let (tx, rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(router.run(rx, shutdown_rx));

        tx.send(InboundEvent::Status(ConnectionStatus::Connected))
            .await
            .unwrap();
        tx.send(InboundEvent::Message {
            topic: "aetheris/telemetry/RV-001".to_string(),
            payload: telemetry("RV-001", 40.0),
        })
        .await
        .unwrap();
        tx.send(InboundEvent::Message {
            topic: "aetheris/telemetry/RV-001".to_string(),
            payload: telemetry("RV-001", 39.0),
        })
        .await
        .unwrap();
        drop(tx);

        handle.await.unwrap();
        assert_eq!(store.robot("RV-001").map(|r| r.battery), Some(39.0));
        assert_eq!(store.connection_status(), ConnectionStatus::Connected);
    }
}
