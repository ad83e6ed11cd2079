//! Transport layer for device sessions
//!
//! The fleet manager never talks to a broker directly. It hands resolved
//! [`SessionOptions`] to a [`Transport`], which establishes the session, starts
//! its delivery loop, and reports everything that happens afterwards as typed
//! [`TransportEvent`]s through an [`EventSink`].

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod mqtt;

/// Reason code reported when the delivery loop dies without a DISCONNECT packet
pub const CONNECTION_LOST: u8 = 0x80;

/// Transport abstraction for establishing device sessions
///
/// Implementations must not block: `connect` is only ever awaited by the
/// connect worker.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to the broker, wait for its acknowledgment and start the
    /// delivery loop. Every later notification for this session goes to `sink`.
    async fn connect(
        &self,
        options: &SessionOptions,
        sink: EventSink,
    ) -> Result<Box<dyn SessionHandle>, TransportError>;
}

/// A live session returned by [`Transport::connect`]
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Subscribe to a topic; the acknowledgment arrives as [`TransportEvent::Subscribed`]
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    /// Publish a payload; the acknowledgment arrives as [`TransportEvent::Published`]
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Disconnect and stop the delivery loop
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Asynchronous notifications raised by a session's delivery loop
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Broker acknowledged the connection; `code` 0 means accepted
    Connected { code: u8 },
    /// Message received on a subscribed topic
    Message { topic: String, payload: Vec<u8> },
    /// Broker acknowledged a publish
    Published { packet_id: u16 },
    /// Broker acknowledged a subscription
    Subscribed { packet_id: u16, reason_codes: Vec<u8> },
    /// Session ended; `code` 0 is a clean disconnect
    Disconnected { code: u8 },
}

/// Callback target for transport notifications of one session
#[derive(Clone)]
pub struct EventSink {
    emit: Arc<dyn Fn(TransportEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new(emit: impl Fn(TransportEvent) + Send + Sync + 'static) -> Self {
        Self {
            emit: Arc::new(emit),
        }
    }

    /// Sink that drops every event
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.emit)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// Everything a transport needs to open one device session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    /// Upper bound on waiting for the broker's acknowledgment
    pub connect_timeout: Duration,
    pub credentials: Option<Credentials>,
    pub tls: Option<TlsMaterial>,
}

impl SessionOptions {
    pub fn new(client_id: &str, host: &str, port: u16) -> Self {
        Self {
            client_id: client_id.to_string(),
            host: host.to_string(),
            port,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            credentials: None,
            tls: None,
        }
    }
}

/// Username/password pair sent in the CONNECT packet
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// PEM material for a verified (and optionally mutual) TLS session
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub ca: Vec<u8>,
    /// Client certificate chain and private key for mutual TLS
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterial {
    pub fn is_mutual(&self) -> bool {
        self.client_auth.is_some()
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_bytes", &self.ca.len())
            .field("mutual", &self.is_mutual())
            .finish()
    }
}

/// Transport-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Broker refused connection with code {code:#04x}")]
    Refused { code: u8 },
    #[error("No connection acknowledgment within {0:?}")]
    ConnAckTimeout(Duration),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Disconnect failed")]
    DisconnectFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}
