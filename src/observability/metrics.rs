//! Thread-safe metrics collection system
//!
//! Atomic counters for ingestion, the MQTT connection and outbound commands,
//! exposed as a serializable snapshot on `/metrics`.

use crate::protocol::MessageKind;
use crate::transport::ConnectionStatus;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics
pub struct MetricsCollector {
    // Ingestion
    messages_received: AtomicU64,
    telemetry_applied: AtomicU64,
    heartbeats_applied: AtomicU64,
    alerts_applied: AtomicU64,
    environment_applied: AtomicU64,
    messages_ignored: AtomicU64,
    messages_discarded: AtomicU64,
    decode_errors: AtomicU64,
    schema_mismatches: AtomicU64,

    // MQTT
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connection_start_time: AtomicU64,
    messages_published: AtomicU64,
    publishes_skipped: AtomicU64,
    publish_failures: AtomicU64,

    // Lifecycle
    connection_status: Mutex<String>,
    status_transitions: AtomicU64,
    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            messages_received: AtomicU64::new(0),
            telemetry_applied: AtomicU64::new(0),
            heartbeats_applied: AtomicU64::new(0),
            alerts_applied: AtomicU64::new(0),
            environment_applied: AtomicU64::new(0),
            messages_ignored: AtomicU64::new(0),
            messages_discarded: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            schema_mismatches: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publishes_skipped: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            connection_status: Mutex::new(ConnectionStatus::Disconnected.to_string()),
            status_transitions: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Ingestion metrics
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_applied(&self, kind: MessageKind) {
        let counter = match kind {
            MessageKind::Telemetry => &self.telemetry_applied,
            MessageKind::Heartbeat => &self.heartbeats_applied,
            MessageKind::Alert => &self.alerts_applied,
            MessageKind::Environment => &self.environment_applied,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Topic not consumed by this service
    pub fn message_ignored(&self) {
        self.messages_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Arrived after disconnect was requested
    pub fn message_discarded(&self) {
        self.messages_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn schema_mismatch(&self) {
        self.schema_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_skipped(&self) {
        self.publishes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_status_changed(&self, status: ConnectionStatus) {
        let connected = status.is_connected();
        self.mqtt_connected.store(connected, Ordering::Relaxed);
        if !connected {
            self.connection_start_time.store(0, Ordering::Relaxed);
        }

        if let Ok(mut current) = self.connection_status.lock() {
            if *current != status.as_str() {
                self.status_transitions.fetch_add(1, Ordering::Relaxed);
                *current = status.to_string();
            }
        }
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.messages_received,
            &self.telemetry_applied,
            &self.heartbeats_applied,
            &self.alerts_applied,
            &self.environment_applied,
            &self.messages_ignored,
            &self.messages_discarded,
            &self.decode_errors,
            &self.schema_mismatches,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connection_start_time,
            &self.messages_published,
            &self.publishes_skipped,
            &self.publish_failures,
            &self.status_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut status) = self.connection_status.lock() {
            *status = ConnectionStatus::Disconnected.to_string();
        }
    }

    fn calculate_connection_duration(&self, now: u64) -> u64 {
        if !self.mqtt_connected.load(Ordering::Relaxed) {
            return 0;
        }
        match self.connection_start_time.load(Ordering::Relaxed) {
            0 => 0,
            start_time => now.saturating_sub(start_time),
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let telemetry = self.telemetry_applied.load(Ordering::Relaxed);
        let heartbeats = self.heartbeats_applied.load(Ordering::Relaxed);
        let alerts = self.alerts_applied.load(Ordering::Relaxed);
        let environment = self.environment_applied.load(Ordering::Relaxed);

        MetricsSnapshot {
            ingestion: IngestionMetrics {
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_applied: telemetry + heartbeats + alerts + environment,
                telemetry_applied: telemetry,
                heartbeats_applied: heartbeats,
                alerts_applied: alerts,
                environment_applied: environment,
                messages_ignored: self.messages_ignored.load(Ordering::Relaxed),
                messages_discarded: self.messages_discarded.load(Ordering::Relaxed),
                decode_errors: self.decode_errors.load(Ordering::Relaxed),
                schema_mismatches: self.schema_mismatches.load(Ordering::Relaxed),
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publishes_skipped: self.publishes_skipped.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            lifecycle: LifecycleMetrics {
                connection_status: self
                    .connection_status
                    .lock()
                    .map(|s| s.clone())
                    .unwrap_or_else(|_| "unknown".to_string()),
                status_transitions: self.status_transitions.load(Ordering::Relaxed),
                uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            },
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub ingestion: IngestionMetrics,
    pub mqtt: MqttMetrics,
    pub lifecycle: LifecycleMetrics,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct IngestionMetrics {
    pub messages_received: u64,
    pub messages_applied: u64,
    pub telemetry_applied: u64,
    pub heartbeats_applied: u64,
    pub alerts_applied: u64,
    pub environment_applied: u64,
    pub messages_ignored: u64,
    pub messages_discarded: u64,
    pub decode_errors: u64,
    pub schema_mismatches: u64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub messages_published: u64,
    pub publishes_skipped: u64,
    pub publish_failures: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct LifecycleMetrics {
    pub connection_status: String,
    pub status_transitions: u64,
    pub uptime_seconds: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ingestion_metrics() {
        let collector = MetricsCollector::new();

        collector.message_received();
        collector.message_received();
        collector.message_received();
        collector.message_applied(MessageKind::Telemetry);
        collector.message_applied(MessageKind::Alert);
        collector.decode_error();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.ingestion.messages_received, 3);
        assert_eq!(metrics.ingestion.messages_applied, 2);
        assert_eq!(metrics.ingestion.telemetry_applied, 1);
        assert_eq!(metrics.ingestion.alerts_applied, 1);
        assert_eq!(metrics.ingestion.decode_errors, 1);
    }

    #[test]
    fn test_mqtt_metrics() {
        let collector = MetricsCollector::new();

        collector.mqtt_connection_attempt();
        collector.mqtt_connection_established();
        collector.mqtt_status_changed(ConnectionStatus::Connected);
        collector.mqtt_message_published();
        collector.mqtt_publish_skipped();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.mqtt.connection_attempts, 1);
        assert_eq!(metrics.mqtt.connections_established, 1);
        assert_eq!(metrics.mqtt.messages_published, 1);
        assert_eq!(metrics.mqtt.publishes_skipped, 1);
        assert!(metrics.mqtt.connected);
        assert_eq!(metrics.lifecycle.connection_status, "connected");
    }

    #[test]
    fn test_status_transitions_count_changes_only() {
        let collector = MetricsCollector::new();

        collector.mqtt_status_changed(ConnectionStatus::Connecting);
        collector.mqtt_status_changed(ConnectionStatus::Connecting);
        collector.mqtt_status_changed(ConnectionStatus::Error);

        let metrics = collector.get_metrics();
        assert_eq!(metrics.lifecycle.status_transitions, 2);
        assert!(!metrics.mqtt.connected);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.message_received();
                        collector.mqtt_message_published();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = collector.get_metrics();
        assert_eq!(metrics.ingestion.messages_received, 1000);
        assert_eq!(metrics.mqtt.messages_published, 1000);
    }

    #[test]
    fn test_reset_functionality() {
        let collector = MetricsCollector::new();

        collector.message_received();
        collector.schema_mismatch();
        collector.mqtt_status_changed(ConnectionStatus::Connected);

        collector.reset();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.ingestion.messages_received, 0);
        assert_eq!(metrics.ingestion.schema_mismatches, 0);
        assert!(!metrics.mqtt.connected);
        assert_eq!(metrics.lifecycle.connection_status, "disconnected");
    }
}
