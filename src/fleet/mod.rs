//! Connection-lifecycle management for a fleet of devices
//!
//! - [`resolver`] - Descriptor validation and session option building
//! - [`session`] - Per-device runtime state
//! - [`registry`] - Connected, disconnected and queued devices
//! - [`catalog`] - Active device descriptors
//! - [`worker`] - Serialized connection attempts with bounded retries
//! - [`reconnect`] - Periodic repair of lost sessions
//! - [`dispatcher`] - Transport notifications applied to the registry
//! - [`manager`] - The facade tying them together

pub mod catalog;
pub mod dispatcher;
pub mod manager;
pub mod reconnect;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod worker;

pub use catalog::{DeviceCatalog, Upsert};
pub use dispatcher::{EventDispatcher, MessageCallback, SessionEvent};
pub use manager::{ConnectOutcome, DisconnectOutcome, FleetManager, OutboundMessage, PublishOutcome};
pub use reconnect::{ReconnectLoop, SweepReport};
pub use registry::{DeviceStatus, Membership, Release, SessionRegistry};
pub use resolver::{CertificateKind, ConnectionResolver, Requirements, ResolveError};
pub use session::Session;
pub use worker::ConnectWorker;

use std::time::Duration;
use tokio::sync::watch;

/// Sleep for `duration` unless shutdown is signaled first
///
/// Returns false when shutdown was observed.
pub(crate) async fn interruptible_sleep(
    shutdown_rx: &mut watch::Receiver<bool>,
    duration: Duration,
) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return false;
                }
            }
        }
    }
}
