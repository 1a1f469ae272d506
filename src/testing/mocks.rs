//! Mock implementations for testing
//!
//! [`MockTransport`] stands in for the MQTT client: it records publishes,
//! lets tests drive the connection status, and injects inbound messages the
//! same way the real supervisor forwards them.

use crate::transport::{
    ConnectionStatus, InboundEvent, PublishOutcome, Transport, TransportError,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};

pub type PublishedMessage = (String, Vec<u8>);

/// Mock transport for testing
///
/// Clones share state, so a test can keep one clone for inspection while the
/// session owns another.
#[derive(Debug, Clone)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub should_fail: bool,
    publish_calls: Arc<AtomicUsize>,
    status: Arc<std::sync::Mutex<ConnectionStatus>>,
    event_sender: Arc<std::sync::Mutex<Option<mpsc::Sender<InboundEvent>>>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    permanently_disconnected: Arc<AtomicBool>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            published_messages: Arc::default(),
            should_fail: false,
            publish_calls: Arc::default(),
            status: Arc::default(),
            event_sender: Arc::default(),
            shutdown_tx: Arc::new(shutdown_tx),
            permanently_disconnected: Arc::default(),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// A transport that reports `connected` without calling `connect`
    pub fn connected() -> Self {
        let transport = Self::default();
        transport.set_status_quietly(ConnectionStatus::Connected);
        transport
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    /// Number of times `publish` was invoked, successful or not
    pub fn publish_calls(&self) -> usize {
        self.publish_calls.load(Ordering::SeqCst)
    }

    pub async fn clear_history(&self) {
        self.published_messages.lock().await.clear();
        self.publish_calls.store(0, Ordering::SeqCst);
    }

    pub fn has_event_sender(&self) -> bool {
        self.sender().is_some()
    }

    /// Change status without notifying the router
    pub fn set_status_quietly(&self, status: ConnectionStatus) {
        if let Ok(mut current) = self.status.lock() {
            *current = status;
        }
    }

    /// Change status and forward it, like a real connection event
    pub async fn set_status(&self, status: ConnectionStatus) {
        self.set_status_quietly(status);
        self.send(InboundEvent::Status(status)).await;
    }

    /// Deliver a message as if it arrived from the broker
    ///
    /// Dropped once disconnect has been requested, like the real supervisor.
    pub async fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        if *self.shutdown_tx.borrow() {
            return;
        }
        self.send(InboundEvent::Message {
            topic: topic.to_string(),
            payload: payload.into(),
        })
        .await;
    }

    /// Forward an arbitrary event, bypassing the shutdown check
    pub async fn inject_event(&self, event: InboundEvent) {
        self.send(event).await;
    }

    /// Simulate exhausted reconnection attempts
    pub async fn terminate(&self, attempts: u32) {
        self.permanently_disconnected.store(true, Ordering::SeqCst);
        self.send(InboundEvent::Terminated { attempts }).await;
        self.set_status(ConnectionStatus::Disconnected).await;
    }

    fn sender(&self) -> Option<mpsc::Sender<InboundEvent>> {
        self.event_sender.lock().ok().and_then(|s| s.clone())
    }

    async fn send(&self, event: InboundEvent) {
        if let Some(sender) = self.sender() {
            let _ = sender.send(event).await;
        }
    }

    fn current_status(&self) -> ConnectionStatus {
        self.status
            .lock()
            .map(|s| *s)
            .unwrap_or(ConnectionStatus::Error)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.should_fail {
            self.set_status(ConnectionStatus::Error).await;
            return Err(TransportError::ConnectionFailed(
                "Mock connection failure".into(),
            ));
        }
        if self.current_status().is_connected() {
            return Ok(());
        }
        self.shutdown_tx.send_replace(false);
        self.set_status(ConnectionStatus::Connected).await;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.shutdown_tx.send_replace(true);
        if self.current_status() != ConnectionStatus::Disconnected {
            self.set_status(ConnectionStatus::Disconnected).await;
        }
        if let Ok(mut sender) = self.event_sender.lock() {
            sender.take();
        }
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<PublishOutcome, TransportError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(TransportError::PublishFailed("Mock publish failure".into()));
        }

        let status = self.current_status();
        if !status.is_connected() {
            return Ok(PublishOutcome::NotConnected(status));
        }

        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload));
        Ok(PublishOutcome::Sent)
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.current_status()
    }

    fn is_permanently_disconnected(&self) -> bool {
        self.permanently_disconnected.load(Ordering::SeqCst)
    }

    fn set_event_sender(&self, sender: mpsc::Sender<InboundEvent>) {
        if let Ok(mut current) = self.event_sender.lock() {
            *current = Some(sender);
        }
    }

    fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}
