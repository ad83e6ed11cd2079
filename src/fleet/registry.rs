//! Session registry: who is connected, who is waiting for repair, who is queued
//!
//! All maps live behind one mutex and every state change is a single method
//! call, so a device is never observed in two places at once.

use crate::fleet::session::Session;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Observable connectivity of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Connected,
    Disconnected,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Connected => f.write_str("CONNECTED"),
            DeviceStatus::Disconnected => f.write_str("DISCONNECTED"),
        }
    }
}

/// Result of releasing a session after its transport went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Unexpected loss; the device now waits in the disconnected map
    Reconnectable,
    /// Requested teardown; the device left the registry entirely
    Removed,
    /// Another session is current for this device; nothing changed
    Stale,
}

/// Where a device currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Membership {
    pub connected: bool,
    pub disconnected: bool,
    pub queued: bool,
    pub status: Option<DeviceStatus>,
}

impl Membership {
    /// Connected, waiting for repair or queued
    pub fn is_live(&self) -> bool {
        self.connected || self.disconnected || self.queued
    }
}

struct DisconnectedEntry {
    session: Arc<Session>,
    since: Instant,
}

#[derive(Default)]
struct RegistryState {
    connected: HashMap<String, Arc<Session>>,
    disconnected: HashMap<String, DisconnectedEntry>,
    /// Device id to the id of the session sitting in the connect queue
    queued: HashMap<String, Uuid>,
    status: HashMap<String, DeviceStatus>,
}

impl RegistryState {
    fn is_live(&self, dev_id: &str) -> bool {
        self.connected.contains_key(dev_id)
            || self.disconnected.contains_key(dev_id)
            || self.queued.contains_key(dev_id)
    }

    fn queued_as(&self, session: &Session) -> bool {
        self.queued.get(session.dev_id()) == Some(&session.id())
    }

    fn promote(&mut self, session: &Arc<Session>) {
        let dev_id = session.dev_id().to_string();
        self.queued.remove(&dev_id);
        self.disconnected.remove(&dev_id);
        self.status.insert(dev_id.clone(), DeviceStatus::Connected);
        self.connected.insert(dev_id, session.clone());
    }

    fn park_disconnected(&mut self, session: &Arc<Session>) {
        let dev_id = session.dev_id().to_string();
        self.connected.remove(&dev_id);
        self.queued.remove(&dev_id);
        self.status.insert(dev_id.clone(), DeviceStatus::Disconnected);
        self.disconnected.insert(
            dev_id,
            DisconnectedEntry {
                session: session.clone(),
                since: Instant::now(),
            },
        );
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a session handed to the connect queue
    ///
    /// Returns false, changing nothing, when the device is already connected,
    /// queued or waiting for repair.
    pub async fn enqueue(&self, session: &Arc<Session>) -> bool {
        let mut state = self.state.lock().await;
        if state.is_live(session.dev_id()) {
            return false;
        }
        let dev_id = session.dev_id().to_string();
        state.queued.insert(dev_id.clone(), session.id());
        state.status.insert(dev_id, DeviceStatus::Disconnected);
        true
    }

    /// Confirm a broker acknowledgment for `session`
    ///
    /// Returns false, changing nothing, unless the session is the connected
    /// one or the one still waiting in the queue. A session that was already
    /// released never becomes current again.
    pub async fn confirm_connected(&self, session: &Arc<Session>) -> bool {
        let mut state = self.state.lock().await;
        let current = match state.connected.get(session.dev_id()) {
            Some(current) => current.same_as(session),
            None => state.queued_as(session),
        };
        if current {
            state.promote(session);
        }
        current
    }

    /// Connect a queued session; false when it is no longer the queued one
    pub async fn promote_queued(&self, session: &Arc<Session>) -> bool {
        let mut state = self.state.lock().await;
        if !state.queued_as(session) {
            return false;
        }
        state.promote(session);
        true
    }

    /// Park a queued session in the disconnected map; false when it is no longer queued
    pub async fn park_queued(&self, session: &Arc<Session>) -> bool {
        let mut state = self.state.lock().await;
        if !state.queued_as(session) {
            return false;
        }
        state.park_disconnected(session);
        true
    }

    /// Park a session in the disconnected map for the reconnect loop
    ///
    /// Returns false when a different session is already connected for the device.
    pub async fn mark_disconnected(&self, session: &Arc<Session>) -> bool {
        let mut state = self.state.lock().await;
        if let Some(current) = state.connected.get(session.dev_id()) {
            if !current.same_as(session) {
                return false;
            }
        }
        state.park_disconnected(session);
        true
    }

    /// Release a session whose transport ended
    ///
    /// A session still in the queue counts as current: its transport can end
    /// before the worker adopts it. A session already parked is left parked.
    pub async fn release(&self, session: &Arc<Session>, manual: bool) -> Release {
        let mut state = self.state.lock().await;
        let dev_id = session.dev_id();

        match state.connected.get(dev_id) {
            Some(current) if current.same_as(session) => {}
            Some(_) => return Release::Stale,
            None if state.queued.contains_key(dev_id) => {
                if !state.queued_as(session) {
                    return Release::Stale;
                }
            }
            None => match state.disconnected.get(dev_id) {
                Some(entry) if !entry.session.same_as(session) => return Release::Stale,
                Some(_) if !manual => return Release::Stale,
                _ => {}
            },
        }

        if manual {
            state.connected.remove(dev_id);
            state.disconnected.remove(dev_id);
            state.queued.remove(dev_id);
            state.status.remove(dev_id);
            Release::Removed
        } else {
            state.park_disconnected(session);
            Release::Reconnectable
        }
    }

    /// Status for a device added with `status = false`; ignored for live devices
    pub async fn record_disabled(&self, dev_id: &str) -> bool {
        let mut state = self.state.lock().await;
        if state.is_live(dev_id) {
            return false;
        }
        state
            .status
            .insert(dev_id.to_string(), DeviceStatus::Disconnected);
        true
    }

    /// Move a device from the disconnected map to the queue as `session`
    ///
    /// Returns false when the device was no longer waiting for repair.
    pub async fn take_for_reconnect(&self, session: &Arc<Session>) -> bool {
        let mut state = self.state.lock().await;
        let dev_id = session.dev_id();
        if state.disconnected.remove(dev_id).is_none() {
            return false;
        }
        state.queued.insert(dev_id.to_string(), session.id());
        state
            .status
            .insert(dev_id.to_string(), DeviceStatus::Disconnected);
        true
    }

    pub async fn has_disconnected(&self) -> bool {
        !self.state.lock().await.disconnected.is_empty()
    }

    /// Disconnected devices that have waited at least `min_dwell`, sorted
    pub async fn reconnect_candidates(&self, min_dwell: Duration) -> Vec<String> {
        let state = self.state.lock().await;
        let now = Instant::now();
        let mut candidates: Vec<String> = state
            .disconnected
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.since) >= min_dwell)
            .map(|(dev_id, _)| dev_id.clone())
            .collect();
        candidates.sort();
        candidates
    }

    pub async fn connected_session(&self, dev_id: &str) -> Option<Arc<Session>> {
        self.state.lock().await.connected.get(dev_id).cloned()
    }

    pub async fn connected_sessions(&self) -> Vec<Arc<Session>> {
        self.state.lock().await.connected.values().cloned().collect()
    }

    pub async fn membership(&self, dev_id: &str) -> Membership {
        let state = self.state.lock().await;
        Membership {
            connected: state.connected.contains_key(dev_id),
            disconnected: state.disconnected.contains_key(dev_id),
            queued: state.queued.contains_key(dev_id),
            status: state.status.get(dev_id).copied(),
        }
    }

    pub async fn is_live(&self, dev_id: &str) -> bool {
        self.membership(dev_id).await.is_live()
    }

    pub async fn status_snapshot(&self) -> BTreeMap<String, DeviceStatus> {
        self.state
            .lock()
            .await
            .status
            .iter()
            .map(|(dev_id, status)| (dev_id.clone(), *status))
            .collect()
    }
}
