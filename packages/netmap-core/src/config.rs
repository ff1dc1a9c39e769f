//! Pipeline tuning knobs. Every field has a default, so a partial TOML table
//! overrides only what it names.

use crate::classifier::ClassifierThresholds;
use crate::discovery::DiscoveryOptions;
use crate::election::ElectionConfig;
use crate::probe::ProbeConfig;
use crate::synthesis::SynthesisOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotCacheConfig {
    pub ttl_ms: u64,
    pub capacity: usize,
}

impl Default for SnapshotCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 5 * 60 * 1000,
            capacity: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub classifier: ClassifierThresholds,
    pub probe: ProbeConfig,
    pub discovery: DiscoveryOptions,
    pub election: ElectionConfig,
    pub synthesis: SynthesisOptions,
    pub snapshot_cache: SnapshotCacheConfig,
    /// Deadline for one whole generation run.
    pub pipeline_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierThresholds::default(),
            probe: ProbeConfig::default(),
            discovery: DiscoveryOptions::default(),
            election: ElectionConfig::default(),
            synthesis: SynthesisOptions::default(),
            snapshot_cache: SnapshotCacheConfig::default(),
            pipeline_timeout_ms: 120_000,
        }
    }
}
