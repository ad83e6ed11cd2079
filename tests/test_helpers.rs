//! Test helpers and utilities for integration tests

use devfleet::config::{ConnectionMethod, DeviceDescriptor, FleetConfig, ManagerSection};
use devfleet::fleet::{DeviceStatus, FleetManager};
use devfleet::testing::MockTransport;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Enabled BASIC device with `fleet/<id>/in` and `fleet/<id>/out` topics
#[allow(dead_code)]
pub fn basic_device(dev_id: &str) -> DeviceDescriptor {
    let lower = dev_id.to_lowercase();
    DeviceDescriptor::new(dev_id, "localhost", 1883, ConnectionMethod::Basic)
        .with_type("sensor")
        .with_topics(
            Some(&format!("fleet/{lower}/in")),
            Some(&format!("fleet/{lower}/out")),
        )
        .enabled(true)
}

/// Fleet configuration with default manager timings
#[allow(dead_code)]
pub fn fleet_config(devices: Vec<DeviceDescriptor>) -> FleetConfig {
    FleetConfig {
        manager: ManagerSection::default(),
        devices,
    }
}

/// Start a manager over a fresh mock transport
#[allow(dead_code)]
pub async fn start_fleet(devices: Vec<DeviceDescriptor>) -> (FleetManager, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let fleet = FleetManager::start(fleet_config(devices), transport.clone()).await;
    (fleet, transport)
}

/// Poll `condition` every 10ms until it holds or 60s of tokio time pass
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Wait until the status projection for `dev_id` equals `expected` (`None` = absent)
#[allow(dead_code)]
pub async fn wait_for_status(
    fleet: &FleetManager,
    dev_id: &str,
    expected: Option<DeviceStatus>,
) -> bool {
    wait_until(|| async move { fleet.status().await.get(dev_id).copied() == expected }).await
}

/// Wait until the mock transport has seen `count` connection attempts for `client_id`
#[allow(dead_code)]
pub async fn wait_for_attempts(transport: &MockTransport, client_id: &str, count: usize) -> bool {
    wait_until(|| async move { transport.attempts(client_id).await >= count }).await
}
