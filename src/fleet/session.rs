//! Runtime state bound to one device for one connection attempt sequence

use crate::config::{ConnectionMethod, DeviceDescriptor};
use crate::transport::{SessionHandle, SessionOptions, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

/// One device session: resolved options, control flags and the live handle
pub struct Session {
    id: Uuid,
    descriptor: Arc<DeviceDescriptor>,
    method: ConnectionMethod,
    options: SessionOptions,
    /// Set once the transport confirmed the connection
    connection_flag: AtomicBool,
    /// Set when an external request tore the session down
    manual_disconnect: AtomicBool,
    handle: RwLock<Option<Arc<dyn SessionHandle>>>,
}

impl Session {
    pub fn new(
        descriptor: Arc<DeviceDescriptor>,
        method: ConnectionMethod,
        options: SessionOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            descriptor,
            method,
            options,
            connection_flag: AtomicBool::new(false),
            manual_disconnect: AtomicBool::new(false),
            handle: RwLock::new(None),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn dev_id(&self) -> &str {
        &self.descriptor.dev_id
    }

    pub fn dev_type(&self) -> &str {
        &self.descriptor.dev_type
    }

    pub fn descriptor(&self) -> &Arc<DeviceDescriptor> {
        &self.descriptor
    }

    pub fn method(&self) -> ConnectionMethod {
        self.method
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn subscribe_topic(&self) -> Option<&str> {
        self.descriptor
            .subscribe_topic
            .as_deref()
            .filter(|t| !t.is_empty())
    }

    pub fn publish_topic(&self) -> Option<&str> {
        self.descriptor
            .publish_topic
            .as_deref()
            .filter(|t| !t.is_empty())
    }

    pub fn is_connected(&self) -> bool {
        self.connection_flag.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connection_flag.store(connected, Ordering::SeqCst);
    }

    pub fn is_manual_disconnect(&self) -> bool {
        self.manual_disconnect.load(Ordering::SeqCst)
    }

    /// Flag the session as torn down on request so it is never resurrected
    pub fn request_manual_disconnect(&self) {
        self.manual_disconnect.store(true, Ordering::SeqCst);
        self.connection_flag.store(false, Ordering::SeqCst);
    }

    /// Same session instance, not merely the same device
    pub fn same_as(&self, other: &Session) -> bool {
        self.id == other.id
    }

    pub async fn attach(&self, handle: Arc<dyn SessionHandle>) {
        *self.handle.write().await = Some(handle);
    }

    pub async fn handle(&self) -> Option<Arc<dyn SessionHandle>> {
        self.handle.read().await.clone()
    }

    pub async fn detach(&self) -> Option<Arc<dyn SessionHandle>> {
        self.handle.write().await.take()
    }

    /// Disconnect the transport session and drop the handle
    pub async fn teardown(&self) -> Result<(), TransportError> {
        self.request_manual_disconnect();

        let Some(handle) = self.handle.write().await.take() else {
            info!(dev_id = %self.dev_id(), "No live transport session to tear down");
            return Ok(());
        };

        handle.disconnect().await.map_err(|e| {
            error!(
                dev_id = %self.dev_id(),
                dev_type = %self.dev_type(),
                "Error disconnecting device: {}", e
            );
            e
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("dev_id", &self.dev_id())
            .field("method", &self.method)
            .field("connection_flag", &self.is_connected())
            .field("manual_disconnect", &self.is_manual_disconnect())
            .finish()
    }
}
