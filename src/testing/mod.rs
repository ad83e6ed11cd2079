//! Testing utilities
//!
//! A scripted in-memory transport so the fleet manager can be exercised
//! without an MQTT broker.

pub mod mocks;

pub use mocks::{MockSessionHandle, MockTransport, PublishedMessage};
