//! Netmap Core Library
//!
//! Infers a network topology (nodes, links, a central node) from a device
//! inventory:
//! - Role classification from vendor prefix, open ports, hostname, OS and TTL
//! - Prioritized reachability probing
//! - Forwarding-table discovery over SNMP Bridge-MIB
//! - Central node election with a snapshot-keyed cache
//! - Link synthesis, validation and persistence
//!
//! # Features
//!
//! - `snmp` (default): SNMP v2c transport for forwarding-table discovery
//!
//! # Example
//!
//! ```no_run
//! use netmap_core::pipeline::{Collaborators, GenerateOptions, TopologyGenerator};
//! use netmap_core::{InMemoryRepository, PipelineConfig, SnmpTransport, StaticInventory, SystemPing, VendorLookup};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let generator = TopologyGenerator::new(
//!         PipelineConfig::default(),
//!         Collaborators {
//!             inventory: Arc::new(StaticInventory::new(Vec::new())),
//!             repository: Arc::new(InMemoryRepository::new()),
//!             liveness: Arc::new(SystemPing),
//!             transport: Arc::new(SnmpTransport::default()),
//!             vendors: Arc::new(VendorLookup::ieee()),
//!         },
//!     );
//!
//!     let report = generator.generate(GenerateOptions::default()).await?;
//!     println!("{} nodes, {} links", report.topology.nodes.len(), report.topology.links.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod classifier;
pub mod config;
pub mod device;
pub mod discovery;
pub mod election;
pub mod error;
pub mod inventory;
pub mod pipeline;
pub mod probe;
pub mod repository;
pub mod synthesis;
pub mod topology;

// Re-export commonly used types
pub use classifier::oui::{OuiDatabase, StaticVendorTable, VendorLookup, VendorTable};
pub use classifier::{ClassificationResult, DeviceClassifier};
pub use config::PipelineConfig;
pub use device::{Device, DeviceRole, DeviceStats};
#[cfg(feature = "snmp")]
pub use discovery::SnmpTransport;
pub use discovery::{LinkDiscoverer, ProtocolTransport};
pub use election::{CentralNodeElector, ElectionConsistency, ElectionResult};
pub use error::{GenerationError, GenerationFailure, InventoryError, PersistenceError, ValidationError};
pub use inventory::{DeviceInventory, StaticInventory};
pub use pipeline::{GenerateOptions, GenerationMetrics, GenerationReport, TopologyGenerator};
pub use probe::{LivenessCheck, ProbeCapabilities, SystemPing, TcpConnect};
pub use repository::{InMemoryRepository, TopologyRepository};
pub use topology::{Topology, TopologyLink, TopologyNode};
