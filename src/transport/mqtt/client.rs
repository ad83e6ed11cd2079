//! Impure I/O operations for rumqttc sessions
//!
//! This module handles all network communication: driving the rumqttc event
//! loop until the broker acknowledges the connection, then running it as the
//! session's delivery loop and forwarding notifications to the event sink.

use super::connection::{configure_mqtt_options, REQUEST_CHANNEL_CAPACITY};
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{
    EventSink, SessionHandle, SessionOptions, Transport, TransportError, TransportEvent,
    CONNECTION_LOST,
};
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet};
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, ConnectionError, Event, EventLoop};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Grace period for the delivery loop to flush our DISCONNECT and stop
const LOOP_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// MQTT v5 transport backed by rumqttc
#[derive(Debug, Default, Clone)]
pub struct RumqttTransport;

impl RumqttTransport {
    pub fn new() -> Self {
        Self
    }

    /// Poll the fresh event loop until the broker answers the CONNECT
    async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), TransportError> {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    return match connack.code {
                        ConnectReturnCode::Success => Ok(()),
                        code => Err(TransportError::Refused { code: code as u8 }),
                    };
                }
                Ok(_) => continue,
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(TransportError::Refused { code: code as u8 });
                }
                Err(e) => return Err(TransportError::ConnectionFailed(Box::new(e))),
            }
        }
    }

    /// Delivery loop: forwards notifications until the session ends
    async fn run_delivery_loop(
        client_id: String,
        mut event_loop: EventLoop,
        sink: EventSink,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        debug!(target: "mqtt_transport", "Delivery loop started for {}", client_id);

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        debug!(target: "mqtt_transport", "Delivery loop stopped for {}", client_id);
                        break;
                    }
                }
                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                            EventRoute::Notify(notification) => {
                                let ends_session = MessageHandler::ends_session(&notification);
                                sink.emit(notification);
                                if ends_session {
                                    break;
                                }
                            }
                            EventRoute::LocalDisconnect => {
                                sink.emit(TransportEvent::Disconnected { code: 0 });
                                break;
                            }
                            EventRoute::InfrastructureEvent(event_str) => {
                                tracing::trace!(
                                    target: "mqtt_transport",
                                    "MQTT event: {}",
                                    event_str
                                );
                            }
                            EventRoute::OutgoingEvent => {}
                        },
                        Err(e) => {
                            error!("MQTT event loop error for {}: {}", client_id, e);
                            sink.emit(TransportEvent::Disconnected { code: CONNECTION_LOST });
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Transport for RumqttTransport {
    async fn connect(
        &self,
        options: &SessionOptions,
        sink: EventSink,
    ) -> Result<Box<dyn SessionHandle>, TransportError> {
        let mqtt_options = configure_mqtt_options(options);
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        tokio::time::timeout(
            options.connect_timeout,
            Self::wait_for_connack(&mut event_loop),
        )
        .await
        .map_err(|_| TransportError::ConnAckTimeout(options.connect_timeout))??;

        info!(
            client_id = %options.client_id,
            host = %options.host,
            port = options.port,
            tls = options.tls.is_some(),
            "Broker accepted connection"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let loop_handle = tokio::spawn(Self::run_delivery_loop(
            options.client_id.clone(),
            event_loop,
            sink,
            stop_rx,
        ));

        Ok(Box::new(RumqttSession {
            client,
            stop_tx,
            loop_handle: Mutex::new(Some(loop_handle)),
        }))
    }
}

/// Live rumqttc session
pub struct RumqttSession {
    client: AsyncClient,
    stop_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RumqttSession {
    /// Wait for the delivery loop to finish, stopping it after the grace period
    async fn join_delivery_loop(&self) {
        let Some(mut handle) = self.loop_handle.lock().await.take() else {
            return;
        };

        match tokio::time::timeout(LOOP_SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => debug!(target: "mqtt_transport", "Delivery loop shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => {
                warn!("Delivery loop task ended with error: {}", e);
            }
            Err(_) => {
                warn!("Delivery loop didn't shut down gracefully, forcing stop");
                self.stop_tx.send_replace(true);
                handle.abort();
            }
            _ => {}
        }
    }
}

#[async_trait]
impl SessionHandle for RumqttSession {
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::SubscriptionFailed(Box::new(e)))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::PublishFailed(Box::new(e)))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let result = self
            .client
            .disconnect()
            .await
            .map_err(|e| TransportError::DisconnectFailed(Box::new(e)));

        // The loop exits on its own once DISCONNECT is flushed
        self.join_delivery_loop().await;
        result
    }
}
