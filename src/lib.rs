//! devfleet - MQTT connection manager for fleets of devices
//!
//! Manages many independent broker sessions as one logical client. Each device
//! carries its own endpoint, credentials, TLS material and topics; sessions are
//! connected in the background, repaired after broker-side disconnects, and
//! devices can be added or removed while the manager runs.
//!
//! # Overview
//!
//! - [`config`] - Fleet file and device descriptors
//! - [`fleet`] - Resolver, registry, connect worker, reconnect loop, dispatcher
//!   and the [`FleetManager`] facade
//! - [`transport`] - The transport seam and its rumqttc implementation
//! - [`observability`] - Logging setup
//! - [`testing`] - A scripted in-memory transport
//!
//! # Quick Start
//!
//! ```rust
//! use devfleet::config::{ConnectionMethod, DeviceDescriptor, FleetConfig};
//! use devfleet::fleet::{DeviceStatus, FleetManager};
//! use devfleet::testing::MockTransport;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let fleet = FleetManager::start(FleetConfig::default(), Arc::new(MockTransport::new())).await;
//!
//! let sensor = DeviceDescriptor::new("sensor-1", "localhost", 1883, ConnectionMethod::Basic)
//!     .with_topics(Some("fleet/sensor-1/in"), Some("fleet/sensor-1/out"));
//! fleet.connect(sensor).await?;
//! assert_eq!(fleet.status().await["sensor-1"], DeviceStatus::Disconnected);
//!
//! if let Some(teardown) = fleet.stop() {
//!     teardown.await?;
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod fleet;
pub mod observability;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, ConnectionMethod, DeviceDescriptor, FleetConfig, ManagerSection};
pub use error::{FleetError, FleetResult};
pub use fleet::{DeviceStatus, FleetManager, PublishOutcome};
pub use transport::mqtt::RumqttTransport;
