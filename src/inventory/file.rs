//! JSON snapshot file inventory

use async_trait::async_trait;
use netmap_core::error::InventoryError;
use netmap_core::inventory::{DeviceInventory, filter_recent};
use netmap_core::Device;
use std::path::PathBuf;

/// Reads a JSON array of devices on every call.
#[derive(Debug, Clone)]
pub struct FileInventory {
    path: PathBuf,
    window: chrono::Duration,
}

impl FileInventory {
    pub fn new(path: PathBuf, window: chrono::Duration) -> Self {
        Self { path, window }
    }
}

#[async_trait]
impl DeviceInventory for FileInventory {
    async fn list_active_devices(&self) -> Result<Vec<Device>, InventoryError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| InventoryError::Unavailable(format!("{}: {}", self.path.display(), e)))?;

        let devices: Vec<Device> = serde_json::from_str(&content)
            .map_err(|e| InventoryError::Malformed(format!("{}: {}", self.path.display(), e)))?;

        let total = devices.len();
        let active = filter_recent(devices, self.window, chrono::Utc::now());
        tracing::debug!(
            "Loaded {} devices from {:?} ({} within recency window)",
            total,
            self.path,
            active.len()
        );
        Ok(active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmap_core::DeviceRole;

    #[tokio::test]
    async fn test_reads_recent_devices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devices.json");
        let now = chrono::Utc::now();
        let stale = now - chrono::Duration::days(3);
        std::fs::write(
            &path,
            format!(
                r#"[
                    {{"id": "gw", "ip": "10.0.0.1", "role": "router", "stats": {{"lastSeen": "{}"}}}},
                    {{"id": "old", "ip": "10.0.0.9", "stats": {{"lastSeen": "{}"}}}},
                    {{"id": "odd", "ip": "10.0.0.7", "role": "toaster", "stats": "n/a"}}
                ]"#,
                now.to_rfc3339(),
                stale.to_rfc3339()
            ),
        )
        .unwrap();

        let inventory = FileInventory::new(path, chrono::Duration::hours(24));
        let devices = inventory.list_active_devices().await.unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "gw");
        assert_eq!(devices[0].role, DeviceRole::Router);
    }

    #[tokio::test]
    async fn test_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = FileInventory::new(dir.path().join("nope.json"), chrono::Duration::hours(1));
        assert!(matches!(
            missing.list_active_devices().await,
            Err(InventoryError::Unavailable(_))
        ));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        let malformed = FileInventory::new(path, chrono::Duration::hours(1));
        assert!(matches!(
            malformed.list_active_devices().await,
            Err(InventoryError::Malformed(_))
        ));
    }
}
