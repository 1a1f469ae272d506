//! Impure I/O operations for MQTT client
//!
//! [`MqttClient`] owns one broker connection. A supervisor task polls the
//! rumqttc event loop, drives the [`LifecycleTracker`], forwards inbound
//! messages and replaces the connection on reconnect.

use super::connection::{configure_mqtt_options, ConnectionStatus, ReconnectConfig, TransportError};
use super::health_monitor::{ConnectionEvent, HealthMetrics, LifecycleTracker, ReconnectionDecision};
use super::message_handler::{log_ignored_route, EventRoute, MessageForwarder, MessageHandler};
use crate::config::MqttSection;
use crate::error::sanitize_error_message;
use crate::observability::metrics;
use crate::transport::{InboundEvent, PublishOutcome, Transport};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Requests buffered between the client handle and the event loop
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long disconnect waits for the supervisor to flush and stop
const SUPERVISOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

type SharedTracker = Arc<std::sync::Mutex<LifecycleTracker>>;

/// MQTT transport for the fleet feed
pub struct MqttClient {
    client_id_prefix: String,
    config: MqttSection,
    client: Arc<Mutex<Option<AsyncClient>>>,
    supervisor: Option<JoinHandle<()>>,
    tracker: SharedTracker,
    status_tx: watch::Sender<ConnectionStatus>,
    shutdown_tx: watch::Sender<bool>,
    permanently_disconnected: Arc<AtomicBool>,
    forwarder: MessageForwarder,
}

impl MqttClient {
    /// Create a client. Broker options are validated here; nothing connects
    /// until [`MqttClient::connect`].
    pub fn new(client_id_prefix: &str, config: MqttSection) -> Result<Self, TransportError> {
        configure_mqtt_options(client_id_prefix, &config)?;

        let reconnect_config = ReconnectConfig::from_section(&config);
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            client_id_prefix: client_id_prefix.to_string(),
            config,
            client: Arc::new(Mutex::new(None)),
            supervisor: None,
            tracker: Arc::new(std::sync::Mutex::new(LifecycleTracker::new(reconnect_config))),
            status_tx,
            shutdown_tx,
            permanently_disconnected: Arc::new(AtomicBool::new(false)),
            forwarder: MessageForwarder::new(),
        })
    }

    /// Create a new client and event loop with a fresh client id
    fn create_connection(
        client_id_prefix: &str,
        config: &MqttSection,
    ) -> Result<(AsyncClient, EventLoop), TransportError> {
        let mqtt_options = configure_mqtt_options(client_id_prefix, config)?;
        let capacity = REQUEST_CHANNEL_CAPACITY.max(config.subscriptions.len() * 2);
        Ok(AsyncClient::new(mqtt_options, capacity))
    }

    /// True while a supervisor is running and has not given up
    pub fn is_active(&self) -> bool {
        self.supervisor
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
            && !self.permanently_disconnected.load(Ordering::SeqCst)
    }

    /// Open the connection and start the supervisor
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.is_active() {
            debug!("connect() called while a connection is active, ignoring");
            return Ok(());
        }

        // A finished supervisor from an earlier session is simply replaced
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }

        let (client, event_loop) = Self::create_connection(&self.client_id_prefix, &self.config)?;
        *self.client.lock().await = Some(client);

        self.shutdown_tx.send_replace(false);
        self.permanently_disconnected.store(false, Ordering::SeqCst);
        metrics::metrics().mqtt_connection_attempt();

        let supervisor = Supervisor {
            client_id_prefix: self.client_id_prefix.clone(),
            config: self.config.clone(),
            client: self.client.clone(),
            tracker: self.tracker.clone(),
            status_tx: self.status_tx.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
            forwarder: self.forwarder.clone(),
            permanently_disconnected: self.permanently_disconnected.clone(),
        };

        let status = lock_tracker(&self.tracker).begin_connect();
        supervisor.publish_status(status).await;

        info!(
            broker_url = %self.config.broker_url,
            subscriptions = self.config.subscriptions.len(),
            "Starting MQTT connection supervisor"
        );
        self.supervisor = Some(tokio::spawn(supervisor.run(event_loop)));
        Ok(())
    }

    /// Wait until the broker acknowledges the connection
    ///
    /// Transient `error` and `disconnected` statuses during reconnection keep
    /// waiting; only exhausting the attempt limit fails early.
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), TransportError> {
        Self::wait_for_connection_confirmation(
            self.status_tx.subscribe(),
            self.permanently_disconnected.clone(),
            lock_tracker(&self.tracker).config().max_attempts,
            timeout,
        )
        .await
    }

    async fn wait_for_connection_confirmation(
        mut status_rx: watch::Receiver<ConnectionStatus>,
        permanently_disconnected: Arc<AtomicBool>,
        max_attempts: u32,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let wait = async {
            loop {
                if status_rx.borrow_and_update().is_connected() {
                    return Ok(());
                }
                if permanently_disconnected.load(Ordering::SeqCst) {
                    return Err(TransportError::PermanentlyDisconnected {
                        attempts: max_attempts,
                    });
                }
                if status_rx.changed().await.is_err() {
                    return Err(TransportError::ConnectionFailed(
                        "Status channel closed".into(),
                    ));
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Close the connection and stop the supervisor
    pub async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.shutdown_tx.send_replace(true);

        let client = self.client.lock().await.take();
        if let Some(client) = client {
            // Fails only when the event loop is already gone
            if let Err(e) = client.disconnect().await {
                debug!("Disconnect request not delivered: {}", e);
            }
        }

        if let Some(mut handle) = self.supervisor.take() {
            match tokio::time::timeout(SUPERVISOR_SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => debug!("MQTT supervisor shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT supervisor ended with error: {}", e),
                Err(_) => {
                    warn!("MQTT supervisor did not stop in time, aborting");
                    handle.abort();
                }
                _ => {}
            }
        }

        let status = lock_tracker(&self.tracker).on_event(ConnectionEvent::Closed);
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            metrics::metrics().mqtt_status_changed(status);
            let _ = self.forwarder.forward(InboundEvent::Status(status)).await;
        }
        self.forwarder.clear();

        info!("MQTT client disconnected");
        Ok(())
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Watch the connection status
    pub fn status_receiver(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        self.permanently_disconnected.load(Ordering::SeqCst)
    }

    /// Reconnection attempts made since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        lock_tracker(&self.tracker).attempts()
    }

    pub fn get_health_metrics(&self) -> HealthMetrics {
        lock_tracker(&self.tracker).health_metrics()
    }

    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<PublishOutcome, TransportError> {
        let status = self.connection_status();
        if !status.is_connected() {
            return Ok(PublishOutcome::NotConnected(status));
        }

        // Clone the handle so the lock is not held while the request queues
        let Some(client) = self.client.lock().await.clone() else {
            return Ok(PublishOutcome::NotConnected(ConnectionStatus::Disconnected));
        };
        client
            .publish(topic, MessageHandler::delivery_qos(), false, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(Box::new(e)))?;
        Ok(PublishOutcome::Sent)
    }
}

fn lock_tracker(tracker: &SharedTracker) -> std::sync::MutexGuard<'_, LifecycleTracker> {
    tracker
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State owned by the supervisor task
struct Supervisor {
    client_id_prefix: String,
    config: MqttSection,
    client: Arc<Mutex<Option<AsyncClient>>>,
    tracker: SharedTracker,
    status_tx: watch::Sender<ConnectionStatus>,
    shutdown_rx: watch::Receiver<bool>,
    forwarder: MessageForwarder,
    permanently_disconnected: Arc<AtomicBool>,
}

impl Supervisor {
    async fn run(self, mut event_loop: EventLoop) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut closing = false;

        loop {
            tokio::select! {
                biased;

                changed = shutdown_rx.changed(), if !closing => {
                    // Keep polling so the queued DISCONNECT reaches the broker
                    closing = changed.is_err() || *shutdown_rx.borrow();
                }

                polled = self.next_event(&mut event_loop) => {
                    let keep_going = match polled {
                        Polled::Event(Ok(event)) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            self.process_event_route(route, &mut event_loop).await
                        }
                        Polled::Event(Err(e)) => self.handle_event_loop_error(e, &mut event_loop).await,
                        Polled::ConnAckTimedOut => self.handle_connect_timeout(&mut event_loop).await,
                    };
                    if !keep_going {
                        break;
                    }
                }
            }
        }
        info!("MQTT supervisor stopped");
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Poll the event loop. Until the broker acknowledges the connection the
    /// poll is bounded by `connect_timeout_ms`.
    async fn next_event(&self, event_loop: &mut EventLoop) -> Polled {
        let connected = self.status_tx.borrow().is_connected();
        if connected {
            return Polled::Event(event_loop.poll().await);
        }

        let deadline = Duration::from_millis(self.config.connect_timeout_ms);
        match tokio::time::timeout(deadline, event_loop.poll()).await {
            Ok(result) => Polled::Event(result),
            Err(_) => Polled::ConnAckTimedOut,
        }
    }

    /// Returns false when the supervisor should stop
    async fn process_event_route(&self, route: EventRoute, event_loop: &mut EventLoop) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.apply(ConnectionEvent::ConnAckReceived).await;
                metrics::metrics().mqtt_connection_established();
                self.resubscribe().await;
                true
            }
            EventRoute::MessageReceived { topic, payload } => {
                if self.shutdown_requested() {
                    debug!(topic = %topic, "Shutdown in progress, message discarded");
                    return true;
                }
                lock_tracker(&self.tracker).record_message();
                if let Err(e) = self
                    .forwarder
                    .forward(InboundEvent::Message { topic, payload })
                    .await
                {
                    warn!("{}", e);
                }
                true
            }
            EventRoute::Disconnected => {
                if self.shutdown_requested() {
                    return false;
                }
                warn!("MQTT broker closed the connection");
                self.apply(ConnectionEvent::Closed).await;
                self.reconnect(event_loop).await
            }
            EventRoute::DisconnectSent => false,
            other => {
                log_ignored_route(&other);
                true
            }
        }
    }

    async fn handle_event_loop_error(
        &self,
        error: ConnectionError,
        event_loop: &mut EventLoop,
    ) -> bool {
        if self.shutdown_requested() {
            debug!("Event loop closed during shutdown: {}", error);
            return false;
        }

        let message = sanitize_error_message(&error.to_string());
        error!("MQTT event loop error: {}", message);
        self.fail_connection(message, event_loop).await
    }

    async fn handle_connect_timeout(&self, event_loop: &mut EventLoop) -> bool {
        if self.shutdown_requested() {
            debug!("Connection attempt abandoned during shutdown");
            return false;
        }

        let message = format!(
            "No CONNACK from broker within {}ms",
            self.config.connect_timeout_ms
        );
        error!("MQTT connect timeout: {}", message);
        self.fail_connection(message, event_loop).await
    }

    /// Report a failed connection and hand over to the reconnection policy
    async fn fail_connection(&self, message: String, event_loop: &mut EventLoop) -> bool {
        metrics::metrics().mqtt_connection_failed();

        self.apply(ConnectionEvent::NetworkError(message.clone())).await;
        let _ = self
            .forwarder
            .forward(InboundEvent::TransportError(message))
            .await;
        self.apply(ConnectionEvent::Closed).await;

        self.reconnect(event_loop).await
    }

    /// Apply the reconnection policy. Returns false when the supervisor stops.
    async fn reconnect(&self, event_loop: &mut EventLoop) -> bool {
        let decision = lock_tracker(&self.tracker).next_reconnection(self.shutdown_requested());

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                let max_attempts = lock_tracker(&self.tracker).config().max_attempts;
                info!(
                    "Attempting reconnection {}/{} after {}ms delay",
                    attempt, max_attempts, delay_ms
                );

                if !interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await
                    || self.shutdown_requested()
                {
                    info!("Shutdown requested, reconnection abandoned");
                    return false;
                }

                self.apply(ConnectionEvent::ReconnectionStarted(attempt)).await;
                metrics::metrics().mqtt_connection_attempt();
                self.apply_new_connection(event_loop).await;
                true
            }
            ReconnectionDecision::AbortShutdownRequested => false,
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let attempts = lock_tracker(&self.tracker).attempts();
                error!(attempts, "Reconnection attempts exhausted, giving up");

                self.permanently_disconnected.store(true, Ordering::SeqCst);
                self.apply(ConnectionEvent::PermanentFailure).await;
                // Wake status watchers even if the status itself is unchanged
                self.status_tx.send_modify(|_| {});
                let _ = self
                    .forwarder
                    .forward(InboundEvent::Terminated { attempts })
                    .await;
                self.client.lock().await.take();
                false
            }
        }
    }

    /// Swap in a fresh client and event loop. On failure the old event loop
    /// stays in place and its next poll retries.
    async fn apply_new_connection(&self, event_loop: &mut EventLoop) {
        match MqttClient::create_connection(&self.client_id_prefix, &self.config) {
            Ok((new_client, new_event_loop)) => {
                *event_loop = new_event_loop;
                *self.client.lock().await = Some(new_client);
                debug!("Created new connection for reconnection attempt");
            }
            Err(e) => error!("Failed to create new connection: {}", e),
        }
    }

    /// Queue every subscription in one request from a detached task. The
    /// supervisor is the only task draining the request channel, so it must
    /// keep polling while publishers compete for the same slots.
    async fn resubscribe(&self) {
        let Some(client) = self.client.lock().await.clone() else {
            return;
        };

        let filters = MessageHandler::build_subscription_filters(&self.config.subscriptions);
        let paths: Vec<String> = filters.iter().map(|filter| filter.path.clone()).collect();
        tokio::spawn(async move {
            match client.subscribe_many(filters).await {
                Ok(()) => debug!(target: "mqtt_transport", "Subscribed to: {}", paths.join(", ")),
                Err(e) => error!("Failed to subscribe to {}: {}", paths.join(", "), e),
            }
        });
    }

    async fn apply(&self, event: ConnectionEvent) {
        let status = lock_tracker(&self.tracker).on_event(event);
        self.publish_status(status).await;
    }

    /// Make a status externally visible, once per change
    async fn publish_status(&self, status: ConnectionStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous == status {
            return;
        }
        metrics::metrics().mqtt_status_changed(status);
        if self.forwarder.has_sender() {
            let _ = self.forwarder.forward(InboundEvent::Status(status)).await;
        }
    }
}

/// One step of the supervisor's event loop
enum Polled {
    Event(Result<Event, ConnectionError>),
    /// The broker accepted the socket but never acknowledged the connection
    ConnAckTimedOut,
}

/// Sleep unless shutdown is requested first.
/// Returns true if the sleep completed.
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
    }
}

#[async_trait]
impl Transport for MqttClient {
    async fn connect(&mut self) -> Result<(), TransportError> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        MqttClient::disconnect(self).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<PublishOutcome, TransportError> {
        MqttClient::publish(self, topic, payload).await
    }

    fn connection_status(&self) -> ConnectionStatus {
        MqttClient::connection_status(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttClient::is_permanently_disconnected(self)
    }

    fn set_event_sender(&self, sender: mpsc::Sender<InboundEvent>) {
        self.forwarder.set_sender(sender);
    }

    fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> MqttSection {
        MqttSection::new("mqtt://localhost:1883")
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = status_tx.send(ConnectionStatus::Error);
            let _ = status_tx.send(ConnectionStatus::Connecting);
            let _ = status_tx.send(ConnectionStatus::Connected);
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result = MqttClient::wait_for_connection_confirmation(
            status_rx,
            Arc::new(AtomicBool::new(false)),
            10,
            Duration::from_millis(500),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);

        let result = MqttClient::wait_for_connection_confirmation(
            status_rx,
            Arc::new(AtomicBool::new(false)),
            10,
            Duration::from_millis(10),
        )
        .await;
        drop(status_tx);

        assert!(matches!(
            result,
            Err(TransportError::ConnectTimeout { timeout_ms: 10 })
        ));
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_terminal() {
        let (_status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let result = MqttClient::wait_for_connection_confirmation(
            status_rx,
            Arc::new(AtomicBool::new(true)),
            3,
            Duration::from_millis(100),
        )
        .await;
        assert!(matches!(
            result,
            Err(TransportError::PermanentlyDisconnected { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(interruptible_sleep(shutdown_rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        assert!(!interruptible_sleep(shutdown_rx, 1_000).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_already_shut_down() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);
        assert!(!interruptible_sleep(shutdown_rx, 1_000).await);
    }

    #[tokio::test]
    async fn test_initial_state() {
        let client = MqttClient::new("test-dashboard", test_config()).unwrap();

        assert_eq!(client.connection_status(), ConnectionStatus::Disconnected);
        assert!(!client.is_permanently_disconnected());
        assert!(!client.is_active());
        assert_eq!(client.reconnect_attempts(), 0);

        let metrics = client.get_health_metrics();
        assert_eq!(metrics.uptime, None);
        assert_eq!(metrics.reconnect_count, 0);
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_broker_url() {
        let mut config = test_config();
        config.broker_url = "not a url".to_string();
        assert!(matches!(
            MqttClient::new("x", config),
            Err(TransportError::InvalidBrokerUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_without_connection_is_skipped() {
        let client = MqttClient::new("test-dashboard", test_config()).unwrap();
        let outcome = client
            .publish("aetheris/commands/RV-001", b"{}".to_vec())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PublishOutcome::NotConnected(ConnectionStatus::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let mut client = MqttClient::new("test-dashboard", test_config()).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        client.set_event_sender(tx);
        let shutdown = client.shutdown_signal();

        assert!(client.disconnect().await.is_ok());
        assert!(*shutdown.borrow());
        assert_eq!(client.connection_status(), ConnectionStatus::Disconnected);

        // Status did not change, so nothing was sent; the sender is released
        assert_eq!(rx.recv().await, None);
    }
}
