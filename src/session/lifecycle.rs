//! Fleet session lifecycle
//!
//! A [`FleetSession`] owns the pieces of one ingestion session: the fleet
//! store, the topic router task and the transport. Starting it wires the
//! transport's event channel into the router and connects; shutting it down
//! disconnects, which releases the channel and lets the router drain and stop.

use crate::commands::CommandPublisher;
use crate::config::FleetConfig;
use crate::fleet::FleetStore;
use crate::routing::TopicRouter;
use crate::transport::{InboundEvent, Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Inbound events buffered between the transport and the router
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for the router to drain
const ROUTER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Ingestion session with an injected transport
pub struct FleetSession<T>
where
    T: Transport + 'static,
{
    config: FleetConfig,
    transport: Arc<RwLock<T>>,
    store: FleetStore,
    commands: CommandPublisher<T>,
    router_handle: Option<JoinHandle<()>>,
    termination: Option<watch::Receiver<Option<u32>>>,
}

impl<T> FleetSession<T>
where
    T: Transport + 'static,
{
    /// Create a session around an unconnected transport
    pub fn new(config: FleetConfig, transport: T) -> Self {
        let transport = Arc::new(RwLock::new(transport));
        let commands = CommandPublisher::new(
            Arc::clone(&transport),
            config.dashboard.source_id.clone(),
        );

        Self {
            config,
            transport,
            store: FleetStore::new(),
            commands,
            router_handle: None,
            termination: None,
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Handle to the session's fleet state
    pub fn store(&self) -> &FleetStore {
        &self.store
    }

    pub fn commands(&self) -> &CommandPublisher<T> {
        &self.commands
    }

    /// Shared transport, for status queries
    pub fn transport(&self) -> Arc<RwLock<T>> {
        Arc::clone(&self.transport)
    }

    pub fn is_running(&self) -> bool {
        self.router_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Create the event channel (pure construction)
    fn create_event_channel() -> (mpsc::Sender<InboundEvent>, mpsc::Receiver<InboundEvent>) {
        mpsc::channel(EVENT_CHANNEL_CAPACITY)
    }

    /// Spawn the router and connect
    ///
    /// Calling this on a running session is a no-op.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.is_running() {
            info!("Fleet session already running");
            return Ok(());
        }

        info!(
            broker = %self.config.mqtt.broker_url,
            subscriptions = self.config.mqtt.subscriptions.len(),
            "Starting fleet session"
        );

        let (event_tx, event_rx) = Self::create_event_channel();
        let router = TopicRouter::new(self.store.clone());
        self.termination = Some(router.termination());

        let shutdown = {
            let transport = self.transport.read().await;
            transport.set_event_sender(event_tx);
            transport.shutdown_signal()
        };
        self.router_handle = Some(tokio::spawn(router.run(event_rx, shutdown)));

        let span = crate::mqtt_span!(operation = "connect", broker = %self.config.mqtt.broker_url);
        self.transport
            .write()
            .await
            .connect()
            .instrument(span)
            .await
            .map_err(SessionError::Transport)?;

        info!("Fleet session started");
        Ok(())
    }

    /// Disconnect and wait for the router to finish applying queued events
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        info!("Shutting down fleet session");

        let span = crate::lifecycle_span!(phase = "shutdown");
        let disconnect_result = self
            .transport
            .write()
            .await
            .disconnect()
            .instrument(span)
            .await;
        if let Err(e) = &disconnect_result {
            error!("Transport disconnect error: {}", e);
        }

        if let Some(mut handle) = self.router_handle.take() {
            match tokio::time::timeout(ROUTER_SHUTDOWN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if !e.is_cancelled() {
                        error!("Topic router shutdown error: {}", e);
                    }
                }
                Err(_) => {
                    warn!("Topic router did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        disconnect_result.map_err(SessionError::Transport)?;
        info!("Fleet session shutdown complete");
        Ok(())
    }

    /// Wait until the transport gives up reconnecting, returning the number
    /// of attempts made
    pub async fn wait_for_termination(&self) -> Result<u32, SessionError> {
        let mut termination = self
            .termination
            .clone()
            .ok_or(SessionError::NotStarted)?;

        let attempts = *termination
            .wait_for(|attempts| attempts.is_some())
            .await
            .map_err(|_| SessionError::RouterStopped)?;
        Ok(attempts.unwrap_or_default())
    }

    /// True once reconnection attempts have been exhausted
    pub async fn is_permanently_disconnected(&self) -> bool {
        self.transport.read().await.is_permanently_disconnected()
    }
}

/// Session lifecycle errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Transport error")]
    Transport(#[source] TransportError),
    #[error("Session has not been started")]
    NotStarted,
    #[error("Topic router stopped")]
    RouterStopped,
}
