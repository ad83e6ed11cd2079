//! Reconnect loop: periodic repair of sessions in the disconnected map

use crate::config::ManagerSection;
use crate::fleet::catalog::DeviceCatalog;
use crate::fleet::interruptible_sleep;
use crate::fleet::registry::SessionRegistry;
use crate::fleet::resolver::ConnectionResolver;
use crate::fleet::session::Session;
use crate::lifecycle_span;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn, Instrument};

/// What one sweep did with each waiting device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub requeued: Vec<String>,
    pub skipped_disabled: Vec<String>,
    /// Registry entries whose descriptor is gone from the catalog
    pub orphaned: Vec<String>,
    pub failed: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty()
            && self.skipped_disabled.is_empty()
            && self.orphaned.is_empty()
            && self.failed.is_empty()
    }
}

pub struct ReconnectLoop {
    registry: Arc<SessionRegistry>,
    catalog: Arc<DeviceCatalog>,
    resolver: ConnectionResolver,
    queue_tx: mpsc::UnboundedSender<Arc<Session>>,
    shutdown_rx: watch::Receiver<bool>,
    idle_poll: Duration,
    sweep_interval: Duration,
}

impl ReconnectLoop {
    pub fn new(
        registry: Arc<SessionRegistry>,
        catalog: Arc<DeviceCatalog>,
        queue_tx: mpsc::UnboundedSender<Arc<Session>>,
        shutdown_rx: watch::Receiver<bool>,
        manager: &ManagerSection,
    ) -> Self {
        Self {
            registry,
            catalog,
            resolver: ConnectionResolver::new(manager),
            queue_tx,
            shutdown_rx,
            idle_poll: manager.idle_poll(),
            sweep_interval: manager.sweep_interval(),
        }
    }

    pub async fn run(mut self) {
        debug!("Reconnect loop started");

        loop {
            if !self.registry.has_disconnected().await {
                if !interruptible_sleep(&mut self.shutdown_rx, self.idle_poll).await {
                    break;
                }
                continue;
            }

            let report = self
                .sweep()
                .instrument(lifecycle_span!(step = "reconnect_sweep"))
                .await;
            if !report.is_empty() {
                debug!(?report, "Reconnect sweep finished");
            }

            if !interruptible_sleep(&mut self.shutdown_rx, self.sweep_interval).await {
                break;
            }
        }

        debug!("Reconnect loop stopped");
    }

    /// Re-enqueue every eligible disconnected device
    ///
    /// A device becomes eligible once it has waited one sweep interval, so a
    /// session that just ran out of attempts is not retried immediately.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for dev_id in self.registry.reconnect_candidates(self.sweep_interval).await {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let Some(descriptor) = self.catalog.find(&dev_id).await else {
                error!(
                    dev_id = %dev_id,
                    invariant = "registry_entry_without_descriptor",
                    "Disconnected device has no active configuration"
                );
                report.orphaned.push(dev_id);
                continue;
            };

            if !descriptor.status {
                warn!(dev_id = %dev_id, "Device is disabled, not reconnecting");
                report.skipped_disabled.push(dev_id);
                continue;
            }

            let session = match self.resolver.resolve(&descriptor) {
                Ok(session) => session,
                Err(e) => {
                    error!(dev_id = %dev_id, "Cannot reconnect device: {}", e);
                    report.failed.push(dev_id);
                    continue;
                }
            };

            if !self.registry.take_for_reconnect(&session).await {
                continue;
            }
            if let Err(mpsc::error::SendError(session)) = self.queue_tx.send(session) {
                warn!(dev_id = %dev_id, "Connect worker is gone, leaving device disconnected");
                self.registry.park_queued(&session).await;
                report.failed.push(dev_id);
                continue;
            }

            info!(dev_id = %dev_id, "Reconnecting device");
            report.requeued.push(dev_id);
        }

        report
    }
}
