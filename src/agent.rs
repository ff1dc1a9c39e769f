//! Wires the configured collaborators into a topology generator.

use crate::config::{AgentConfig, ConfigSource, load_agent_config};
use crate::inventory::build_inventory;
use crate::persistence::FileRepository;
use anyhow::Result;
use netmap_core::pipeline::{Collaborators, TopologyGenerator};
use netmap_core::probe::{ProbeCapabilities, detect_capabilities};
use netmap_core::{SnmpTransport, VendorLookup};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Agent {
    pub generator: TopologyGenerator,
    pub config: AgentConfig,
    pub config_source: ConfigSource,
    pub capabilities: ProbeCapabilities,
    pub storage_dir: PathBuf,
}

/// Load configuration, detect probing capabilities and build the generator.
pub async fn build_agent() -> Result<Agent> {
    let (config, config_source) = load_agent_config();

    let capabilities = detect_capabilities(config.liveness).await;
    if let Some(warning) = &capabilities.warning {
        tracing::warn!("{}", warning);
    }

    let vendors = Arc::new(VendorLookup::ieee());
    let inventory = build_inventory(&config, vendors.clone())?;
    let storage_dir = config.storage_dir();

    let generator = TopologyGenerator::new(
        config.pipeline.clone(),
        Collaborators {
            inventory,
            repository: Arc::new(FileRepository::new(storage_dir.clone())),
            liveness: capabilities.liveness_check(),
            transport: Arc::new(SnmpTransport::default()),
            vendors,
        },
    )
    .with_source(format!("netmap-agent/{}", env!("CARGO_PKG_VERSION")));

    tracing::debug!(
        "Agent ready: inventory {}, liveness {}, store {:?}",
        config.inventory,
        capabilities.method,
        storage_dir
    );

    Ok(Agent {
        generator,
        config,
        config_source,
        capabilities,
        storage_dir,
    })
}
