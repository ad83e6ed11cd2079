//! Event dispatcher: applies transport notifications to the registry
//!
//! Every session's [`EventSink`] forwards into one unbounded channel. A single
//! task consumes it, so notifications for all devices are applied in arrival
//! order and never race each other.

use crate::fleet::registry::{Release, SessionRegistry};
use crate::fleet::session::Session;
use crate::transport::mqtt::MessageHandler;
use crate::transport::{EventSink, TransportEvent};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

/// External consumer of inbound messages: `(dev_id, payload_text)`
pub type MessageCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// A transport notification tagged with the session that raised it
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session: Arc<Session>,
    pub event: TransportEvent,
}

/// Build the sink handed to the transport for `session`
///
/// The sink holds the session weakly: the session owns the transport handle,
/// which owns the sink.
pub fn sink_for(session: &Arc<Session>, tx: mpsc::UnboundedSender<SessionEvent>) -> EventSink {
    let weak: Weak<Session> = Arc::downgrade(session);
    EventSink::new(move |event| {
        if let Some(session) = weak.upgrade() {
            // Receiver gone means the manager has stopped
            let _ = tx.send(SessionEvent { session, event });
        }
    })
}

pub struct EventDispatcher {
    registry: Arc<SessionRegistry>,
    callback: Arc<RwLock<Option<MessageCallback>>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl EventDispatcher {
    pub fn new(
        registry: Arc<SessionRegistry>,
        callback: Arc<RwLock<Option<MessageCallback>>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            callback,
            shutdown_rx,
        }
    }

    fn shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Consume events until `halt_rx` fires (then drain) or every sender is gone
    pub async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<SessionEvent>,
        mut halt_rx: watch::Receiver<bool>,
    ) {
        debug!("Event dispatcher started");

        loop {
            tokio::select! {
                biased;
                maybe_event = rx.recv() => match maybe_event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
                changed = halt_rx.changed() => {
                    if changed.is_err() || *halt_rx.borrow() {
                        while let Ok(event) = rx.try_recv() {
                            self.handle_event(event).await;
                        }
                        break;
                    }
                }
            }
        }

        debug!("Event dispatcher stopped");
    }

    pub async fn handle_event(&self, SessionEvent { session, event }: SessionEvent) {
        match event {
            TransportEvent::Connected { code } => self.on_connect(&session, code).await,
            TransportEvent::Message { topic, payload } => {
                self.on_message(&session, &topic, &payload).await
            }
            TransportEvent::Published { packet_id } => {
                debug!(dev_id = %session.dev_id(), packet_id, "Message published");
            }
            TransportEvent::Subscribed {
                packet_id,
                reason_codes,
            } => match MessageHandler::validate_subscription_success(&reason_codes) {
                Ok(()) => info!(
                    dev_id = %session.dev_id(),
                    packet_id,
                    "Subscription acknowledged"
                ),
                Err(reason) => warn!(dev_id = %session.dev_id(), packet_id, "{}", reason),
            },
            TransportEvent::Disconnected { code } => self.on_disconnect(&session, code).await,
        }
    }

    async fn on_connect(&self, session: &Arc<Session>, code: u8) {
        if code != 0 {
            session.set_connected(false);
            error!(
                dev_id = %session.dev_id(),
                dev_type = %session.dev_type(),
                code,
                "Broker rejected connection"
            );
            if !self.shutting_down() {
                self.registry.mark_disconnected(session).await;
            }
            return;
        }

        if session.is_manual_disconnect() || self.shutting_down() {
            debug!(dev_id = %session.dev_id(), "Ignoring connect for a session being torn down");
            return;
        }

        if !self.registry.confirm_connected(session).await {
            debug!(
                dev_id = %session.dev_id(),
                session_id = %session.id(),
                "Ignoring connect for a session that was already released"
            );
            return;
        }
        session.set_connected(true);
        info!(
            dev_id = %session.dev_id(),
            dev_type = %session.dev_type(),
            "Connected to MQTT broker"
        );

        let Some(topic) = session.subscribe_topic() else {
            warn!(dev_id = %session.dev_id(), "Subscribe topic not configured");
            return;
        };
        let Some(handle) = session.handle().await else {
            warn!(dev_id = %session.dev_id(), "Connected session has no transport handle");
            return;
        };
        match handle.subscribe(topic).await {
            Ok(()) => info!(dev_id = %session.dev_id(), topic, "Subscribed"),
            Err(e) => error!(dev_id = %session.dev_id(), topic, "Subscription failed: {}", e),
        }
    }

    async fn on_message(&self, session: &Arc<Session>, topic: &str, payload: &[u8]) {
        let text = MessageHandler::decode_payload(payload);
        let callback = self.callback.read().await.clone();
        match callback {
            Some(callback) => callback(session.dev_id(), &text),
            None => debug!(
                dev_id = %session.dev_id(),
                topic,
                "No message callback registered, dropping message"
            ),
        }
    }

    async fn on_disconnect(&self, session: &Arc<Session>, code: u8) {
        session.set_connected(false);

        if code != 0 {
            error!(
                dev_id = %session.dev_id(),
                dev_type = %session.dev_type(),
                code,
                "Unexpected disconnection"
            );
        }

        if self.shutting_down() {
            info!(dev_id = %session.dev_id(), "Disconnected during shutdown");
            return;
        }

        match self
            .registry
            .release(session, session.is_manual_disconnect())
            .await
        {
            Release::Reconnectable => warn!(
                dev_id = %session.dev_id(),
                "Connection lost, waiting for reconnect"
            ),
            Release::Removed => info!(dev_id = %session.dev_id(), "Device disconnected"),
            Release::Stale => debug!(
                dev_id = %session.dev_id(),
                session_id = %session.id(),
                "Ignoring disconnect from a superseded session"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionMethod, DeviceDescriptor};
    use crate::fleet::registry::{DeviceStatus, Membership};
    use crate::transport::SessionOptions;
    use std::sync::Mutex as StdMutex;

    fn session(dev_id: &str) -> Arc<Session> {
        let descriptor = DeviceDescriptor::new(dev_id, "localhost", 1883, ConnectionMethod::Basic);
        Session::new(
            Arc::new(descriptor),
            ConnectionMethod::Basic,
            SessionOptions::new(dev_id, "localhost", 1883),
        )
    }

    fn dispatcher() -> (EventDispatcher, Arc<SessionRegistry>, watch::Sender<bool>) {
        let registry = Arc::new(SessionRegistry::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let dispatcher = EventDispatcher::new(
            registry.clone(),
            Arc::new(RwLock::new(None)),
            shutdown_rx,
        );
        (dispatcher, registry, shutdown_tx)
    }

    async fn connected(registry: &SessionRegistry, dev_id: &str) -> Arc<Session> {
        let s = session(dev_id);
        registry.enqueue(&s).await;
        registry.promote_queued(&s).await;
        s
    }

    fn event(session: &Arc<Session>, event: TransportEvent) -> SessionEvent {
        SessionEvent {
            session: session.clone(),
            event,
        }
    }

    #[tokio::test]
    async fn test_connect_marks_connected() {
        let (dispatcher, registry, _tx) = dispatcher();
        let s = session("D1");
        registry.enqueue(&s).await;

        dispatcher
            .handle_event(event(&s, TransportEvent::Connected { code: 0 }))
            .await;

        assert!(s.is_connected());
        assert_eq!(
            registry.membership("D1").await.status,
            Some(DeviceStatus::Connected)
        );
    }

    #[tokio::test]
    async fn test_connect_after_loss_is_ignored() {
        let (dispatcher, registry, _tx) = dispatcher();
        let s = connected(&registry, "D1").await;

        dispatcher
            .handle_event(event(&s, TransportEvent::Disconnected { code: 0x80 }))
            .await;
        dispatcher
            .handle_event(event(&s, TransportEvent::Connected { code: 0 }))
            .await;

        assert!(!s.is_connected());
        let m = registry.membership("D1").await;
        assert!(m.disconnected && !m.connected);
        assert_eq!(m.status, Some(DeviceStatus::Disconnected));
    }

    #[tokio::test]
    async fn test_refused_connect_parks_device() {
        let (dispatcher, registry, _tx) = dispatcher();
        let s = session("D1");

        dispatcher
            .handle_event(event(&s, TransportEvent::Connected { code: 5 }))
            .await;

        assert!(!s.is_connected());
        assert!(registry.membership("D1").await.disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_during_shutdown_leaves_maps() {
        let (dispatcher, registry, shutdown_tx) = dispatcher();
        let s = connected(&registry, "D1").await;
        shutdown_tx.send_replace(true);

        dispatcher
            .handle_event(event(&s, TransportEvent::Disconnected { code: 0x80 }))
            .await;

        assert!(registry.membership("D1").await.connected);
    }

    #[tokio::test]
    async fn test_manual_disconnect_clears_status() {
        let (dispatcher, registry, _tx) = dispatcher();
        let s = connected(&registry, "D1").await;
        s.request_manual_disconnect();

        dispatcher
            .handle_event(event(&s, TransportEvent::Disconnected { code: 0 }))
            .await;

        assert_eq!(registry.membership("D1").await, Membership::default());
    }

    #[tokio::test]
    async fn test_message_reaches_callback() {
        let registry = Arc::new(SessionRegistry::new());
        let (_tx, shutdown_rx) = watch::channel(false);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let callback: MessageCallback = Arc::new(move |dev_id: &str, text: &str| {
            seen_clone
                .lock()
                .unwrap()
                .push((dev_id.to_string(), text.to_string()))
        });
        let dispatcher =
            EventDispatcher::new(registry, Arc::new(RwLock::new(Some(callback))), shutdown_rx);
        let s = session("D1");

        dispatcher
            .handle_event(event(
                &s,
                TransportEvent::Message {
                    topic: "fleet/d1/in".to_string(),
                    payload: b"hello".to_vec(),
                },
            ))
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("D1".to_string(), "hello".to_string())]
        );
    }

    #[tokio::test]
    async fn test_sink_does_not_keep_session_alive() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let s = session("D1");
        let sink = sink_for(&s, tx);

        sink.emit(TransportEvent::Published { packet_id: 1 });
        assert!(rx.try_recv().is_ok());

        drop(s);
        sink.emit(TransportEvent::Published { packet_id: 2 });
        assert!(rx.try_recv().is_err());
    }
}
