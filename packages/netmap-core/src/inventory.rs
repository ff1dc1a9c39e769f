//! Device inventory interface

use crate::device::Device;
use crate::error::InventoryError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

#[async_trait]
pub trait DeviceInventory: Send + Sync {
    /// Devices observed within the inventory's recency window.
    async fn list_active_devices(&self) -> Result<Vec<Device>, InventoryError>;
}

/// Keep devices whose `lastSeen` is within `window` of `now`.
pub fn filter_recent(devices: Vec<Device>, window: Duration, now: DateTime<Utc>) -> Vec<Device> {
    devices
        .into_iter()
        .filter(|d| now.signed_duration_since(d.stats.last_seen) <= window)
        .collect()
}

/// Inventory over a fixed, replaceable device list.
#[derive(Debug, Default)]
pub struct StaticInventory {
    devices: RwLock<Vec<Device>>,
}

impl StaticInventory {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: RwLock::new(devices),
        }
    }

    pub async fn replace(&self, devices: Vec<Device>) {
        *self.devices.write().await = devices;
    }
}

#[async_trait]
impl DeviceInventory for StaticInventory {
    async fn list_active_devices(&self) -> Result<Vec<Device>, InventoryError> {
        Ok(self.devices.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_recent() {
        let now = Utc::now();
        let devices = vec![
            Device::new("fresh", "10.0.0.1").with_last_seen(now - Duration::minutes(5)),
            Device::new("stale", "10.0.0.2").with_last_seen(now - Duration::days(2)),
            Device::new("never", "10.0.0.3"),
        ];
        let kept = filter_recent(devices, Duration::hours(24), now);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "fresh");
    }

    #[tokio::test]
    async fn test_static_inventory_replace() {
        let inventory = StaticInventory::new(vec![Device::new("a", "10.0.0.1")]);
        assert_eq!(inventory.list_active_devices().await.unwrap().len(), 1);
        inventory.replace(Vec::new()).await;
        assert!(inventory.list_active_devices().await.unwrap().is_empty());
    }
}
