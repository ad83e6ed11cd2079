//! Connect worker: the single consumer of the connect queue
//!
//! Connection attempts are serialized so a slow broker only delays other
//! connection attempts, never message traffic on live sessions.

use crate::config::ManagerSection;
use crate::device_span;
use crate::fleet::catalog::DeviceCatalog;
use crate::fleet::dispatcher::{sink_for, SessionEvent};
use crate::fleet::interruptible_sleep;
use crate::fleet::registry::SessionRegistry;
use crate::fleet::session::Session;
use crate::transport::{EventSink, SessionHandle, Transport, TransportEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn, Instrument};

/// How one queued session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Connected { attempt: u32 },
    Exhausted,
    /// Shutdown arrived between attempts
    Abandoned,
    /// The descriptor was removed while the session was queued
    Withdrawn,
    /// The transport ended before the session could be adopted
    Lost,
}

pub struct ConnectWorker<T: Transport> {
    transport: Arc<T>,
    registry: Arc<SessionRegistry>,
    catalog: Arc<DeviceCatalog>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    shutdown_rx: watch::Receiver<bool>,
    max_attempts: u32,
    retry_backoff: Duration,
    queue_poll: Duration,
}

impl<T: Transport> ConnectWorker<T> {
    pub fn new(
        transport: Arc<T>,
        registry: Arc<SessionRegistry>,
        catalog: Arc<DeviceCatalog>,
        events_tx: mpsc::UnboundedSender<SessionEvent>,
        shutdown_rx: watch::Receiver<bool>,
        manager: &ManagerSection,
    ) -> Self {
        Self {
            transport,
            registry,
            catalog,
            events_tx,
            shutdown_rx,
            max_attempts: manager.connect_attempts.max(1),
            retry_backoff: manager.retry_backoff(),
            queue_poll: manager.queue_poll(),
        }
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Consume the queue until shutdown or until every sender is dropped
    pub async fn run(mut self, mut queue: mpsc::UnboundedReceiver<Arc<Session>>) {
        debug!("Connect worker started");

        while !self.shutting_down() {
            let session = match tokio::time::timeout(self.queue_poll, queue.recv()).await {
                Err(_) => continue,
                Ok(None) => break,
                Ok(Some(session)) => session,
            };

            let span = device_span!(dev_id = %session.dev_id(), session_id = %session.id());
            self.process(session).instrument(span).await;
        }

        debug!("Connect worker stopped");
    }

    /// Run the bounded attempt sequence for one session
    pub async fn process(&mut self, session: Arc<Session>) -> AttemptOutcome {
        let sink = sink_for(&session, self.events_tx.clone());

        for attempt in 1..=self.max_attempts {
            if self.shutting_down() {
                return self.give_up(&session, AttemptOutcome::Abandoned).await;
            }
            if !self.catalog.contains(session.dev_id()).await {
                return self.withdraw(&session).await;
            }

            match self.transport.connect(session.options(), sink.clone()).await {
                Ok(handle) => {
                    let handle: Arc<dyn SessionHandle> = Arc::from(handle);
                    return self.adopt(&session, handle, attempt, &sink).await;
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        "Connection attempt failed: {}",
                        e
                    );
                }
            }

            if attempt < self.max_attempts
                && !interruptible_sleep(&mut self.shutdown_rx, self.retry_backoff).await
            {
                return self.give_up(&session, AttemptOutcome::Abandoned).await;
            }
        }

        self.give_up(&session, AttemptOutcome::Exhausted).await
    }

    async fn adopt(
        &self,
        session: &Arc<Session>,
        handle: Arc<dyn SessionHandle>,
        attempt: u32,
        sink: &EventSink,
    ) -> AttemptOutcome {
        if self.shutting_down() || session.is_manual_disconnect() {
            if let Err(e) = handle.disconnect().await {
                warn!("Failed to close session opened during shutdown: {}", e);
            }
            return self.give_up(session, AttemptOutcome::Abandoned).await;
        }

        if !self.catalog.contains(session.dev_id()).await {
            let outcome = self.withdraw(session).await;
            if let Err(e) = handle.disconnect().await {
                warn!("Failed to close withdrawn session: {}", e);
            }
            return outcome;
        }

        session.attach(handle.clone()).await;
        if !self.registry.promote_queued(session).await {
            // The dispatcher already parked the device for the reconnect loop
            warn!("Connection ended before the session was adopted");
            session.detach().await;
            if let Err(e) = handle.disconnect().await {
                debug!("Closing lost session: {}", e);
            }
            return AttemptOutcome::Lost;
        }

        info!(
            dev_type = %session.dev_type(),
            method = %session.method(),
            attempt,
            "Device connected"
        );
        sink.emit(TransportEvent::Connected { code: 0 });
        AttemptOutcome::Connected { attempt }
    }

    /// Leave the device parked without a descriptor; the reconnect loop reports it
    async fn withdraw(&self, session: &Arc<Session>) -> AttemptOutcome {
        self.registry.park_queued(session).await;
        info!("Device removed from configuration while queued, not connecting");
        AttemptOutcome::Withdrawn
    }

    async fn give_up(&self, session: &Arc<Session>, outcome: AttemptOutcome) -> AttemptOutcome {
        if self.registry.park_queued(session).await {
            match outcome {
                AttemptOutcome::Exhausted => error!(
                    dev_type = %session.dev_type(),
                    attempts = self.max_attempts,
                    "Failed to connect, waiting for reconnect sweep"
                ),
                _ => info!("Shutdown requested, abandoning connection attempts"),
            }
        }
        outcome
    }
}
