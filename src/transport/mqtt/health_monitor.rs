//! Pure health monitoring and reconnection logic for MQTT client
//!
//! The connection lifecycle is a small state machine driven by
//! [`ConnectionEvent`]s. [`LifecycleTracker`] holds that machine so the
//! supervisor task only has to feed it events and act on its decisions.

use super::connection::{ConnectionStatus, ReconnectConfig};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Longest silence on a live connection still reported as healthy
pub const SILENT_FEED_LIMIT: Duration = Duration::from_secs(300);

/// Stateless policy functions; [`LifecycleTracker`] holds the state
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide whether another reconnection attempt is allowed
    ///
    /// `current_attempts` counts attempts already made since the last
    /// successful connect. Attempts `1..=max_attempts` proceed; the one after
    /// that is refused.
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if current_attempts >= config.max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }

        let attempt = current_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.delay_for_attempt(attempt),
        }
    }

    /// Status that follows an event. The transition does not depend on the
    /// current status: every event has exactly one target.
    pub fn determine_next_status(event: &ConnectionEvent) -> ConnectionStatus {
        match event {
            ConnectionEvent::ConnAckReceived => ConnectionStatus::Connected,
            ConnectionEvent::NetworkError(_) => ConnectionStatus::Error,
            ConnectionEvent::Closed => ConnectionStatus::Disconnected,
            ConnectionEvent::ReconnectionStarted(_) => ConnectionStatus::Connecting,
            ConnectionEvent::PermanentFailure => ConnectionStatus::Disconnected,
        }
    }

    pub fn can_publish(status: ConnectionStatus) -> bool {
        status.is_connected()
    }

    pub fn can_subscribe(status: ConnectionStatus) -> bool {
        status.is_connected()
    }

    /// Connection health as of `now`
    ///
    /// A live connection counts as healthy until the feed has been silent for
    /// [`SILENT_FEED_LIMIT`]. A connection that has not delivered anything yet
    /// is given the benefit of the doubt.
    pub fn calculate_health_metrics(
        now: Instant,
        connected_since: Option<Instant>,
        last_message_at: Option<Instant>,
        reconnect_count: u32,
    ) -> HealthMetrics {
        let since = |at: Instant| now.saturating_duration_since(at);
        let uptime = connected_since.map(since);
        let time_since_last_message = last_message_at.map(since);

        let is_healthy = uptime.is_some()
            && time_since_last_message.map_or(true, |silence| silence < SILENT_FEED_LIMIT);

        HealthMetrics {
            uptime,
            time_since_last_message,
            reconnect_count,
            is_healthy,
        }
    }

    pub fn log_state_transition(from: ConnectionStatus, to: ConnectionStatus) {
        match (from, to) {
            (ConnectionStatus::Connecting, ConnectionStatus::Connected) => {
                info!("MQTT connection established");
            }
            (ConnectionStatus::Connected, ConnectionStatus::Error) => {
                warn!("MQTT connection failed while connected");
            }
            (_, ConnectionStatus::Disconnected) => {
                info!(from = %from, "MQTT connection closed");
            }
            (_, ConnectionStatus::Error) => {
                error!(from = %from, "MQTT connection error");
            }
            _ => {
                info!("MQTT connection status: {} -> {}", from, to);
            }
        }
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded,
}

/// Connection events that trigger status transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// ConnAck received from broker
    ConnAckReceived,
    /// Network or protocol error from the event loop
    NetworkError(String),
    /// Connection closed, cleanly or not
    Closed,
    /// Reconnection attempt started
    ReconnectionStarted(u32),
    /// Attempt limit exceeded, no more retries
    PermanentFailure,
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone)]
pub struct HealthMetrics {
    pub uptime: Option<Duration>,
    pub time_since_last_message: Option<Duration>,
    /// Reconnections since the client was created
    pub reconnect_count: u32,
    pub is_healthy: bool,
}

/// Connection lifecycle state machine
///
/// `disconnected -> connecting -> connected`, with `error` and `disconnected`
/// reachable from anywhere. The attempt counter resets on every ConnAck.
#[derive(Debug, Clone)]
pub struct LifecycleTracker {
    status: ConnectionStatus,
    attempts: u32,
    config: ReconnectConfig,
    terminated: bool,
    reconnect_count: u32,
    connected_since: Option<Instant>,
    last_message_at: Option<Instant>,
}

impl LifecycleTracker {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            attempts: 0,
            config,
            terminated: false,
            reconnect_count: 0,
            connected_since: None,
            last_message_at: None,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Reconnection attempts made since the last successful connect
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Explicit connect request: start over from a clean slate
    pub fn begin_connect(&mut self) -> ConnectionStatus {
        self.attempts = 0;
        self.terminated = false;
        self.set_status(ConnectionStatus::Connecting)
    }

    /// Apply an event and return the resulting status
    pub fn on_event(&mut self, event: ConnectionEvent) -> ConnectionStatus {
        match &event {
            ConnectionEvent::ConnAckReceived => {
                self.attempts = 0;
                self.connected_since = Some(Instant::now());
            }
            ConnectionEvent::NetworkError(_) | ConnectionEvent::Closed => {
                self.connected_since = None;
            }
            ConnectionEvent::ReconnectionStarted(_) => {
                self.reconnect_count = self.reconnect_count.saturating_add(1);
            }
            ConnectionEvent::PermanentFailure => {
                self.terminated = true;
                self.connected_since = None;
            }
        }
        self.set_status(HealthMonitor::determine_next_status(&event))
    }

    /// Consult the reconnection policy, consuming an attempt when it proceeds
    pub fn next_reconnection(&mut self, shutdown_requested: bool) -> ReconnectionDecision {
        let decision =
            HealthMonitor::should_attempt_reconnection(self.attempts, &self.config, shutdown_requested);
        if let ReconnectionDecision::Proceed { attempt, .. } = decision {
            self.attempts = attempt;
        }
        decision
    }

    pub fn record_message(&mut self) {
        self.last_message_at = Some(Instant::now());
    }

    pub fn health_metrics(&self) -> HealthMetrics {
        HealthMonitor::calculate_health_metrics(
            Instant::now(),
            self.connected_since,
            self.last_message_at,
            self.reconnect_count,
        )
    }

    fn set_status(&mut self, next: ConnectionStatus) -> ConnectionStatus {
        if next != self.status {
            HealthMonitor::log_state_transition(self.status, next);
            self.status = next;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            interval_ms: 100,
            max_attempts,
        }
    }

    #[test]
    fn test_should_attempt_reconnection() {
        let config = config(3);

        assert_eq!(
            HealthMonitor::should_attempt_reconnection(0, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay_ms: 100
            }
        );
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(2, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 3,
                delay_ms: 100
            }
        );
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(3, &config, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(0, &config, true),
            ReconnectionDecision::AbortShutdownRequested
        );
    }

    #[test]
    fn test_determine_next_status() {
        assert_eq!(
            HealthMonitor::determine_next_status(&ConnectionEvent::ConnAckReceived),
            ConnectionStatus::Connected
        );
        assert_eq!(
            HealthMonitor::determine_next_status(&ConnectionEvent::NetworkError("io".into())),
            ConnectionStatus::Error
        );
        assert_eq!(
            HealthMonitor::determine_next_status(&ConnectionEvent::Closed),
            ConnectionStatus::Disconnected
        );
        assert_eq!(
            HealthMonitor::determine_next_status(&ConnectionEvent::ReconnectionStarted(2)),
            ConnectionStatus::Connecting
        );
    }

    #[test]
    fn test_can_publish_only_when_connected() {
        assert!(HealthMonitor::can_publish(ConnectionStatus::Connected));
        assert!(!HealthMonitor::can_publish(ConnectionStatus::Connecting));
        assert!(!HealthMonitor::can_publish(ConnectionStatus::Error));
        assert!(!HealthMonitor::can_subscribe(ConnectionStatus::Disconnected));
    }

    #[test]
    fn test_error_close_reconnect_cycle_resets_attempts() {
        let mut tracker = LifecycleTracker::new(config(10));
        assert_eq!(tracker.status(), ConnectionStatus::Disconnected);

        assert_eq!(tracker.begin_connect(), ConnectionStatus::Connecting);
        assert_eq!(
            tracker.on_event(ConnectionEvent::ConnAckReceived),
            ConnectionStatus::Connected
        );

        assert_eq!(
            tracker.on_event(ConnectionEvent::NetworkError("connection reset".into())),
            ConnectionStatus::Error
        );
        assert_eq!(
            tracker.on_event(ConnectionEvent::Closed),
            ConnectionStatus::Disconnected
        );

        assert!(matches!(
            tracker.next_reconnection(false),
            ReconnectionDecision::Proceed { attempt: 1, .. }
        ));
        assert_eq!(
            tracker.on_event(ConnectionEvent::ReconnectionStarted(1)),
            ConnectionStatus::Connecting
        );
        assert_eq!(tracker.attempts(), 1);

        assert_eq!(
            tracker.on_event(ConnectionEvent::ConnAckReceived),
            ConnectionStatus::Connected
        );
        assert_eq!(tracker.attempts(), 0);
        assert!(tracker.health_metrics().is_healthy);
        assert_eq!(tracker.health_metrics().reconnect_count, 1);
    }

    #[test]
    fn test_attempts_exhaust_then_terminate() {
        let mut tracker = LifecycleTracker::new(config(2));
        tracker.begin_connect();

        assert!(matches!(
            tracker.next_reconnection(false),
            ReconnectionDecision::Proceed { attempt: 1, .. }
        ));
        assert!(matches!(
            tracker.next_reconnection(false),
            ReconnectionDecision::Proceed { attempt: 2, .. }
        ));
        assert_eq!(
            tracker.next_reconnection(false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );

        assert_eq!(
            tracker.on_event(ConnectionEvent::PermanentFailure),
            ConnectionStatus::Disconnected
        );
        assert!(tracker.is_terminated());

        // A fresh connect request clears the terminal flag
        tracker.begin_connect();
        assert!(!tracker.is_terminated());
        assert_eq!(tracker.attempts(), 0);
    }

    #[test]
    fn test_health_metrics() {
        let earlier = Instant::now();
        let now = earlier + Duration::from_secs(10);

        let metrics = HealthMonitor::calculate_health_metrics(now, None, None, 0);
        assert!(!metrics.is_healthy);
        assert_eq!(metrics.uptime, None);

        let metrics = HealthMonitor::calculate_health_metrics(now, Some(earlier), None, 0);
        assert!(metrics.is_healthy);
        assert_eq!(metrics.uptime, Some(Duration::from_secs(10)));

        let metrics = HealthMonitor::calculate_health_metrics(now, Some(earlier), Some(now), 5);
        assert!(metrics.is_healthy);
        assert_eq!(metrics.reconnect_count, 5);
    }

    #[test]
    fn test_silent_feed_is_unhealthy() {
        let now = Instant::now() + SILENT_FEED_LIMIT + Duration::from_secs(1);
        let connected = Instant::now();

        let metrics = HealthMonitor::calculate_health_metrics(now, Some(connected), Some(connected), 0);
        assert!(!metrics.is_healthy);
        assert!(metrics.time_since_last_message.is_some_and(|d| d > SILENT_FEED_LIMIT));
    }
}
