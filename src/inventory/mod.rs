//! Device inventory adapters
//!
//! Every adapter returns devices seen within the configured recency window.

pub mod arp;
pub mod file;
pub mod http;

pub use arp::ArpInventory;
pub use file::FileInventory;
pub use http::HttpInventory;

use crate::config::{AgentConfig, InventorySource};
use anyhow::{Context, Result};
use netmap_core::DeviceInventory;
use netmap_core::classifier::oui::VendorLookup;
use std::sync::Arc;
use std::time::Duration;

/// Build the inventory named by the agent configuration.
pub fn build_inventory(config: &AgentConfig, vendors: Arc<VendorLookup>) -> Result<Arc<dyn DeviceInventory>> {
    let window = chrono::Duration::hours(config.recency_hours.max(1));

    let inventory: Arc<dyn DeviceInventory> = match &config.inventory {
        InventorySource::Arp => Arc::new(ArpInventory::new(vendors, window)),
        InventorySource::File { path } => Arc::new(FileInventory::new(path.clone(), window)),
        InventorySource::Http { url, timeout_secs } => Arc::new(
            HttpInventory::new(url.clone(), Duration::from_secs(*timeout_secs), window)
                .context("Failed to create HTTP inventory client")?,
        ),
    };

    tracing::debug!("Device inventory: {}", config.inventory);
    Ok(inventory)
}
