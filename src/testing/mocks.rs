//! Scripted transport for exercising the fleet manager without a broker
//!
//! Behavior is keyed by MQTT client id (the `dev_id` unless the descriptor
//! overrides it). Tests script failures up front, then drive the live sessions
//! with [`MockTransport::drop_connection`] and [`MockTransport::deliver`].

use crate::transport::{
    EventSink, SessionHandle, SessionOptions, Transport, TransportError, TransportEvent,
    CONNECTION_LOST,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub type PublishedMessage = (String, Vec<u8>);

#[derive(Default)]
struct ClientScript {
    fail_next: u32,
    drop_after_connack: u32,
    silent_disconnect: bool,
    unreachable: bool,
    fail_publish: bool,
    attempts: Vec<Instant>,
    options: Vec<SessionOptions>,
    live: Option<LiveSession>,
    subscriptions: Vec<String>,
    published: Vec<PublishedMessage>,
}

struct LiveSession {
    sink: EventSink,
    open: Arc<AtomicBool>,
}

type Scripts = Arc<Mutex<HashMap<String, ClientScript>>>;

/// Mock transport for testing
#[derive(Clone, Default)]
pub struct MockTransport {
    scripts: Scripts,
    packet_ids: Arc<AtomicU16>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` connection attempts for this client
    pub async fn fail_next(&self, client_id: &str, count: u32) {
        self.script(client_id, |s| s.fail_next = count).await;
    }

    /// Accept the next `count` connections, then lose each one before `connect` returns
    pub async fn drop_after_connack(&self, client_id: &str, count: u32) {
        self.script(client_id, |s| s.drop_after_connack = count).await;
    }

    /// Close sessions on request without emitting a disconnect event
    pub async fn silent_disconnect(&self, client_id: &str, silent: bool) {
        self.script(client_id, |s| s.silent_disconnect = silent).await;
    }

    /// Fail every connection attempt until reset
    pub async fn set_unreachable(&self, client_id: &str, unreachable: bool) {
        self.script(client_id, |s| s.unreachable = unreachable).await;
    }

    pub async fn fail_publish(&self, client_id: &str, fail: bool) {
        self.script(client_id, |s| s.fail_publish = fail).await;
    }

    pub async fn attempts(&self, client_id: &str) -> usize {
        self.read(client_id, |s| s.attempts.len()).await
    }

    /// When each connection attempt happened, on the tokio clock
    pub async fn attempt_times(&self, client_id: &str) -> Vec<Instant> {
        self.read(client_id, |s| s.attempts.clone()).await
    }

    /// Options passed to the most recent attempt
    pub async fn last_options(&self, client_id: &str) -> Option<SessionOptions> {
        self.read(client_id, |s| s.options.last().cloned()).await
    }

    pub async fn is_open(&self, client_id: &str) -> bool {
        self.read(client_id, |s| s.live.is_some()).await
    }

    pub async fn subscriptions(&self, client_id: &str) -> Vec<String> {
        self.read(client_id, |s| s.subscriptions.clone()).await
    }

    pub async fn published(&self, client_id: &str) -> Vec<PublishedMessage> {
        self.read(client_id, |s| s.published.clone()).await
    }

    /// Simulate the broker dropping the session with the given reason code
    ///
    /// Returns false when no session was open.
    pub async fn drop_connection(&self, client_id: &str, code: u8) -> bool {
        let live = self.scripts.lock().await.get_mut(client_id).and_then(|s| s.live.take());
        match live {
            Some(live) => {
                live.open.store(false, Ordering::SeqCst);
                live.sink.emit(TransportEvent::Disconnected { code });
                true
            }
            None => false,
        }
    }

    /// Deliver an inbound message on an open session
    pub async fn deliver(&self, client_id: &str, topic: &str, payload: &[u8]) -> bool {
        let scripts = self.scripts.lock().await;
        match scripts.get(client_id).and_then(|s| s.live.as_ref()) {
            Some(live) => {
                live.sink.emit(TransportEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                });
                true
            }
            None => false,
        }
    }

    async fn script(&self, client_id: &str, apply: impl FnOnce(&mut ClientScript)) {
        let mut scripts = self.scripts.lock().await;
        apply(scripts.entry(client_id.to_string()).or_default());
    }

    async fn read<R: Default>(&self, client_id: &str, read: impl FnOnce(&ClientScript) -> R) -> R {
        self.scripts
            .lock()
            .await
            .get(client_id)
            .map(read)
            .unwrap_or_default()
    }

    fn next_packet_id(&self) -> u16 {
        self.packet_ids.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        options: &SessionOptions,
        sink: EventSink,
    ) -> Result<Box<dyn SessionHandle>, TransportError> {
        let mut scripts = self.scripts.lock().await;
        let script = scripts.entry(options.client_id.clone()).or_default();
        script.attempts.push(Instant::now());
        script.options.push(options.clone());

        if script.unreachable {
            return Err(TransportError::ConnectionFailed(
                "mock broker unreachable".into(),
            ));
        }
        if script.fail_next > 0 {
            script.fail_next -= 1;
            return Err(TransportError::ConnectionFailed(
                "mock connection failure".into(),
            ));
        }

        let open = Arc::new(AtomicBool::new(true));
        if script.drop_after_connack > 0 {
            script.drop_after_connack -= 1;
            open.store(false, Ordering::SeqCst);
            sink.emit(TransportEvent::Disconnected {
                code: CONNECTION_LOST,
            });
        } else {
            script.live = Some(LiveSession {
                sink: sink.clone(),
                open: open.clone(),
            });
        }

        Ok(Box::new(MockSessionHandle {
            client_id: options.client_id.clone(),
            transport: self.clone(),
            sink,
            open,
        }))
    }
}

/// Handle for one open mock session
pub struct MockSessionHandle {
    client_id: String,
    transport: MockTransport,
    sink: EventSink,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl SessionHandle for MockSessionHandle {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::SubscriptionFailed("session closed".into()));
        }
        self.transport
            .script(&self.client_id, |s| s.subscriptions.push(topic.to_string()))
            .await;
        self.sink.emit(TransportEvent::Subscribed {
            packet_id: self.transport.next_packet_id(),
            reason_codes: vec![1],
        });
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::PublishFailed("session closed".into()));
        }
        let mut scripts = self.transport.scripts.lock().await;
        let script = scripts.entry(self.client_id.clone()).or_default();
        if script.fail_publish {
            return Err(TransportError::PublishFailed("mock publish failure".into()));
        }
        script.published.push((topic.to_string(), payload));
        drop(scripts);

        self.sink.emit(TransportEvent::Published {
            packet_id: self.transport.next_packet_id(),
        });
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let silent = self
            .transport
            .read(&self.client_id, |s| s.silent_disconnect)
            .await;
        self.transport
            .script(&self.client_id, |s| s.live = None)
            .await;
        if !silent {
            self.sink.emit(TransportEvent::Disconnected { code: 0 });
        }
        Ok(())
    }
}
