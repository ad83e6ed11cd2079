//! rumqttc implementation of the device transport
//!
//! The module separates pure functions from I/O for testability:
//!
//! - [`connection`] - Pure translation of session options into rumqttc options
//! - [`message_handler`] - Pure routing of rumqttc events into notifications
//! - [`client`] - Impure connect handshake and per-session delivery loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use devfleet::transport::mqtt::RumqttTransport;
//! use devfleet::transport::{EventSink, SessionOptions, Transport};
//!
//! # tokio_test::block_on(async {
//! let transport = RumqttTransport::new();
//! let options = SessionOptions::new("sensor-1", "localhost", 1883);
//! let session = transport.connect(&options, EventSink::discard()).await?;
//! session.subscribe("fleet/sensor-1/in").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{RumqttSession, RumqttTransport};
pub use connection::configure_mqtt_options;
pub use message_handler::{EventRoute, MessageHandler};
