//! Fleet manager facade
//!
//! [`FleetManager::start`] wires the connect worker, reconnect loop and event
//! dispatcher to one transport and enrolls every enabled device. The facade
//! methods only touch shared state and channels; socket work happens on the
//! background tasks.

use crate::config::{DeviceDescriptor, FleetConfig};
use crate::error::{FleetError, FleetResult};
use crate::fleet::catalog::DeviceCatalog;
use crate::fleet::dispatcher::{EventDispatcher, MessageCallback};
use crate::fleet::reconnect::ReconnectLoop;
use crate::fleet::registry::{DeviceStatus, Release, SessionRegistry};
use crate::fleet::resolver::ConnectionResolver;
use crate::fleet::session::Session;
use crate::fleet::worker::ConnectWorker;
use crate::transport::Transport;
use crate::{device_span, lifecycle_span};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Grace period for each background task to exit after shutdown
const TASK_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Payload accepted by [`FleetManager::publish`]
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Sent verbatim
    Text(String),
    /// Serialized as JSON indented by four spaces; a bare JSON string is sent verbatim
    Json(Value),
}

const JSON_INDENT: &[u8] = b"    ";

impl OutboundMessage {
    pub fn into_payload(self) -> String {
        match self {
            OutboundMessage::Text(text) => text,
            OutboundMessage::Json(Value::String(text)) => text,
            OutboundMessage::Json(value) => indented_json(&value),
        }
    }
}

fn indented_json(value: &Value) -> String {
    let mut buf = Vec::new();
    let mut serializer =
        serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(JSON_INDENT));
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8(buf).unwrap_or_else(|_| value.to_string()),
        Err(_) => value.to_string(),
    }
}

impl From<&str> for OutboundMessage {
    fn from(text: &str) -> Self {
        OutboundMessage::Text(text.to_string())
    }
}

impl From<String> for OutboundMessage {
    fn from(text: String) -> Self {
        OutboundMessage::Text(text)
    }
}

impl From<Value> for OutboundMessage {
    fn from(value: Value) -> Self {
        OutboundMessage::Json(value)
    }
}

/// What [`FleetManager::connect`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Resolved and handed to the connect worker
    Enqueued,
    /// Stored with `status = false`; reported as DISCONNECTED
    RecordedDisabled,
    /// Already connected, queued or waiting for repair; only the descriptor was updated
    AlreadyActive,
}

/// What [`FleetManager::disconnect`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// A live session is being torn down in the background
    TearingDown,
    NotConnected,
}

/// Result of [`FleetManager::publish`]; publishing never raises an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    NotConnected,
    NoPublishTopic,
    Failed(String),
}

pub struct FleetManager {
    catalog: Arc<DeviceCatalog>,
    registry: Arc<SessionRegistry>,
    resolver: ConnectionResolver,
    queue_tx: mpsc::UnboundedSender<Arc<Session>>,
    callback: Arc<RwLock<Option<MessageCallback>>>,
    shutdown_tx: watch::Sender<bool>,
    halt_tx: Arc<watch::Sender<bool>>,
    stopped: AtomicBool,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl FleetManager {
    /// Spawn the background tasks and enroll every enabled device
    pub async fn start<T: Transport>(config: FleetConfig, transport: Arc<T>) -> Self {
        let FleetConfig { manager, devices } = config;

        let catalog = Arc::new(DeviceCatalog::new(devices));
        let registry = Arc::new(SessionRegistry::new());
        let callback: Arc<RwLock<Option<MessageCallback>>> = Arc::new(RwLock::new(None));
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (halt_tx, halt_rx) = watch::channel(false);

        let worker = ConnectWorker::new(
            transport,
            registry.clone(),
            catalog.clone(),
            events_tx,
            shutdown_rx.clone(),
            &manager,
        );
        let reconnect = ReconnectLoop::new(
            registry.clone(),
            catalog.clone(),
            queue_tx.clone(),
            shutdown_rx.clone(),
            &manager,
        );
        let dispatcher = EventDispatcher::new(registry.clone(), callback.clone(), shutdown_rx);

        let tasks = vec![
            tokio::spawn(worker.run(queue_rx)),
            tokio::spawn(reconnect.run()),
            tokio::spawn(dispatcher.run(events_rx, halt_rx)),
        ];

        let fleet = Self {
            catalog,
            registry,
            resolver: ConnectionResolver::new(&manager),
            queue_tx,
            callback,
            shutdown_tx,
            halt_tx: Arc::new(halt_tx),
            stopped: AtomicBool::new(false),
            tasks: StdMutex::new(tasks),
        };

        fleet.enroll_configured().instrument(lifecycle_span!(step = "start")).await;
        fleet
    }

    async fn enroll_configured(&self) {
        let devices = self.catalog.snapshot().await;
        info!(devices = devices.len(), "Starting fleet manager");

        for descriptor in devices.iter().filter(|d| d.status) {
            match self.resolver.resolve(descriptor) {
                Ok(session) => match self.enqueue(session).await {
                    Ok(true) => debug!(dev_id = %descriptor.dev_id, "Device queued for connection"),
                    Ok(false) => {}
                    Err(e) => {
                        error!(dev_id = %descriptor.dev_id, "Failed to enqueue device: {}", e)
                    }
                },
                Err(e) => error!(
                    dev_id = %descriptor.dev_id,
                    dev_type = %descriptor.dev_type,
                    "Device not enrolled: {}", e
                ),
            }
        }
    }

    /// Hand a session to the connect worker; false when the device is already live
    async fn enqueue(&self, session: Arc<Session>) -> FleetResult<bool> {
        if !self.registry.enqueue(&session).await {
            return Ok(false);
        }
        if let Err(mpsc::error::SendError(session)) = self.queue_tx.send(session) {
            self.registry.park_queued(&session).await;
            return Err(FleetError::Stopped);
        }
        Ok(true)
    }

    /// Register the consumer of inbound messages, replacing any previous one
    pub async fn on_message(&self, callback: impl Fn(&str, &str) + Send + Sync + 'static) {
        *self.callback.write().await = Some(Arc::new(callback));
    }

    /// Add or overwrite a device and connect it if it is enabled and idle
    pub async fn connect(&self, descriptor: DeviceDescriptor) -> FleetResult<ConnectOutcome> {
        let span = device_span!(dev_id = %descriptor.dev_id);
        self.connect_inner(descriptor).instrument(span).await
    }

    async fn connect_inner(&self, descriptor: DeviceDescriptor) -> FleetResult<ConnectOutcome> {
        if self.is_stopped() {
            warn!("Fleet manager is stopped, ignoring connect");
            return Err(FleetError::Stopped);
        }

        let dev_id = descriptor.dev_id.clone();
        let had_descriptor = self.catalog.contains(&dev_id).await;
        self.catalog.upsert(descriptor.clone()).await;

        if self.registry.is_live(&dev_id).await {
            if !had_descriptor {
                error!(
                    invariant = "registry_entry_without_descriptor",
                    "Device was active without an active configuration"
                );
            }
            info!("Device already connected or pending, configuration updated");
            return Ok(ConnectOutcome::AlreadyActive);
        }

        if !descriptor.status {
            if !self.registry.record_disabled(&dev_id).await {
                return Ok(ConnectOutcome::AlreadyActive);
            }
            info!("Device added disabled, not connecting");
            return Ok(ConnectOutcome::RecordedDisabled);
        }

        let session = self.resolver.resolve(&descriptor).map_err(|e| {
            error!(dev_type = %descriptor.dev_type, "Cannot connect device: {}", e);
            e
        })?;
        if !self.enqueue(session).await? {
            info!("Device became active concurrently, configuration updated");
            return Ok(ConnectOutcome::AlreadyActive);
        }
        info!("Device queued for connection");
        Ok(ConnectOutcome::Enqueued)
    }

    /// Add a device from its JSON descriptor
    pub async fn connect_json(&self, json: &str) -> FleetResult<ConnectOutcome> {
        let descriptor = DeviceDescriptor::from_json(json)?;
        self.connect(descriptor).await
    }

    /// Remove a device and tear down its session if one is connected
    ///
    /// A device that is not connected only loses its configuration; its
    /// registry entry is left for the reconnect loop to report.
    pub async fn disconnect(&self, dev_id: &str) -> DisconnectOutcome {
        if self.catalog.remove(dev_id).await.is_none() {
            debug!(dev_id, "Device had no active configuration");
        }

        let Some(session) = self.registry.connected_session(dev_id).await else {
            warn!(dev_id, "Device is not connected");
            return DisconnectOutcome::NotConnected;
        };

        session.request_manual_disconnect();
        session.set_connected(false);
        let registry = self.registry.clone();
        let span = device_span!(dev_id = %dev_id);
        tokio::spawn(
            async move {
                // The transport may end without a disconnect notification
                let _ = session.teardown().await;
                let released = registry.release(&session, true).await;
                info!(removed = released == Release::Removed, "Device teardown finished");
            }
            .instrument(span),
        );

        info!(dev_id, "Disconnecting device");
        DisconnectOutcome::TearingDown
    }

    /// Publish to the device's configured publish topic
    pub async fn publish(
        &self,
        dev_id: &str,
        message: impl Into<OutboundMessage>,
    ) -> PublishOutcome {
        let Some(session) = self.registry.connected_session(dev_id).await else {
            warn!(dev_id, "Device is not connected, message not published");
            return PublishOutcome::NotConnected;
        };
        let Some(topic) = session.publish_topic() else {
            warn!(dev_id, "Publish topic not configured");
            return PublishOutcome::NoPublishTopic;
        };
        let Some(handle) = session.handle().await else {
            warn!(dev_id, "Device session has no transport handle");
            return PublishOutcome::NotConnected;
        };

        let payload = message.into().into_payload();
        match handle.publish(topic, payload.into_bytes()).await {
            Ok(()) => {
                debug!(dev_id, topic, "Message handed to transport");
                PublishOutcome::Published
            }
            Err(e) => {
                error!(dev_id, topic, "Publish failed: {}", e);
                PublishOutcome::Failed(e.to_string())
            }
        }
    }

    pub async fn status(&self) -> BTreeMap<String, DeviceStatus> {
        self.registry.status_snapshot().await
    }

    /// Active configuration set, in insertion order
    pub async fn devices(&self) -> Vec<Arc<DeviceDescriptor>> {
        self.catalog.snapshot().await
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Signal shutdown and tear down every connected session in the background
    ///
    /// Returns the teardown task on the first call, `None` afterwards.
    pub fn stop(&self) -> Option<JoinHandle<()>> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return None;
        }

        info!("Stopping fleet manager");
        self.shutdown_tx.send_replace(true);

        let registry = self.registry.clone();
        let halt_tx = self.halt_tx.clone();
        let tasks = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();

        Some(tokio::spawn(
            async move {
                for session in registry.connected_sessions().await {
                    if let Err(e) = session.teardown().await {
                        warn!(dev_id = %session.dev_id(), "Teardown failed: {}", e);
                    }
                }
                halt_tx.send_replace(true);

                for mut task in tasks {
                    match tokio::time::timeout(TASK_SHUTDOWN_GRACE, &mut task).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => warn!("Background task ended with error: {}", e),
                        Err(_) => {
                            warn!("Background task didn't stop in time, aborting");
                            task.abort();
                        }
                    }
                }
                info!("Fleet manager stopped");
            }
            .instrument(lifecycle_span!(step = "stop")),
        ))
    }
}
