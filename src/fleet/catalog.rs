//! Ordered set of active device descriptors

use crate::config::DeviceDescriptor;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of inserting a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Added,
    Replaced,
}

#[derive(Debug, Default)]
pub struct DeviceCatalog {
    devices: RwLock<Vec<Arc<DeviceDescriptor>>>,
}

impl DeviceCatalog {
    pub fn new(devices: impl IntoIterator<Item = DeviceDescriptor>) -> Self {
        Self {
            devices: RwLock::new(devices.into_iter().map(Arc::new).collect()),
        }
    }

    /// Insert or overwrite by `dev_id`, keeping the original position on overwrite
    pub async fn upsert(&self, descriptor: DeviceDescriptor) -> Upsert {
        let mut devices = self.devices.write().await;
        let descriptor = Arc::new(descriptor);
        match devices.iter_mut().find(|d| d.dev_id == descriptor.dev_id) {
            Some(slot) => {
                *slot = descriptor;
                Upsert::Replaced
            }
            None => {
                devices.push(descriptor);
                Upsert::Added
            }
        }
    }

    pub async fn remove(&self, dev_id: &str) -> Option<Arc<DeviceDescriptor>> {
        let mut devices = self.devices.write().await;
        let index = devices.iter().position(|d| d.dev_id == dev_id)?;
        Some(devices.remove(index))
    }

    pub async fn find(&self, dev_id: &str) -> Option<Arc<DeviceDescriptor>> {
        self.devices
            .read()
            .await
            .iter()
            .find(|d| d.dev_id == dev_id)
            .cloned()
    }

    pub async fn contains(&self, dev_id: &str) -> bool {
        self.find(dev_id).await.is_some()
    }

    pub async fn snapshot(&self) -> Vec<Arc<DeviceDescriptor>> {
        self.devices.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionMethod;

    fn device(dev_id: &str, endpoint: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(dev_id, endpoint, 1883, ConnectionMethod::Basic)
    }

    #[tokio::test]
    async fn test_upsert_keeps_order() {
        let catalog = DeviceCatalog::new([device("A", "a"), device("B", "b")]);

        assert_eq!(catalog.upsert(device("C", "c")).await, Upsert::Added);
        assert_eq!(catalog.upsert(device("A", "a2")).await, Upsert::Replaced);

        let ids: Vec<_> = catalog
            .snapshot()
            .await
            .iter()
            .map(|d| d.dev_id.clone())
            .collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(catalog.find("A").await.unwrap().endpoint, "a2");
    }

    #[tokio::test]
    async fn test_remove() {
        let catalog = DeviceCatalog::new([device("A", "a")]);
        assert!(catalog.remove("A").await.is_some());
        assert!(catalog.remove("A").await.is_none());
        assert!(!catalog.contains("A").await);
    }
}
