//! Outbound robot commands
//!
//! [`CommandPublisher`] wraps each [`Command`] in an envelope stamped with the
//! dashboard's source id, the current time and a sequence number, then
//! publishes it at-least-once. Publishing while the connection is down is a
//! logged no-op, reported as [`PublishOutcome::NotConnected`].

use crate::protocol::topics::{self, validate_segment};
use crate::protocol::{current_timestamp_ms, Command, MessageEnvelope};
use crate::transport::{publish_envelope, PublishOutcome, Transport, TransportError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Publishes commands through a shared transport
pub struct CommandPublisher<T: Transport> {
    transport: Arc<RwLock<T>>,
    source_id: String,
    seq: Arc<AtomicU64>,
}

impl<T: Transport> Clone for CommandPublisher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            source_id: self.source_id.clone(),
            seq: Arc::clone(&self.seq),
        }
    }
}

impl<T: Transport> CommandPublisher<T> {
    /// Sequence numbers start at the current time in ms so restarts rarely
    /// reuse a recent value.
    pub fn new(transport: Arc<RwLock<T>>, source_id: impl Into<String>) -> Self {
        Self {
            transport,
            source_id: source_id.into(),
            seq: Arc::new(AtomicU64::new(current_timestamp_ms())),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Wrap a command in a fresh envelope
    pub fn envelope(&self, command: Command) -> MessageEnvelope<Command> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        MessageEnvelope::new(command, self.source_id.clone(), seq)
    }

    /// Send a command to one robot on `aetheris/commands/{robot_id}`
    pub async fn send_command(
        &self,
        robot_id: &str,
        command: Command,
    ) -> Result<PublishOutcome, TransportError> {
        validate_segment(robot_id)?;
        let topic = topics::commands(robot_id);
        info!(robot_id = %robot_id, command = command.name(), "Sending command");
        self.publish(&topic, command).await
    }

    /// Send a command to every robot on `aetheris/commands/broadcast`
    pub async fn broadcast_command(
        &self,
        command: Command,
    ) -> Result<PublishOutcome, TransportError> {
        info!(command = command.name(), "Broadcasting command");
        self.publish(topics::COMMANDS_BROADCAST, command).await
    }

    async fn publish(
        &self,
        topic: &str,
        command: Command,
    ) -> Result<PublishOutcome, TransportError> {
        let envelope = self.envelope(command);
        let transport = self.transport.read().await;
        publish_envelope(&*transport, topic, &envelope).await
    }
}
