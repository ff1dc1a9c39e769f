//! Topology generation orchestrator
//!
//! device snapshot -> snapshot cache -> classification -> reachability ->
//! (protocol discovery || central election) -> link synthesis -> assembly ->
//! validation -> persist + cache
//!
//! Runs are serialized by a single generation lock, so two concurrent callers
//! with the same snapshot never both do the work: the second finds the first
//! one's result in the snapshot cache.

use crate::cache::{CacheStats, SnapshotCache};
use crate::classifier::DeviceClassifier;
use crate::classifier::oui::VendorLookup;
use crate::config::PipelineConfig;
use crate::device::Device;
use crate::discovery::{LinkDiscoverer, ProtocolTransport};
use crate::election::{CentralNodeElector, ElectionConsistency, ElectionOptions};
use crate::error::{
    GenerationError, GenerationFailure, InventoryError, PersistenceError,
};
use crate::inventory::DeviceInventory;
use crate::probe::{LivenessCheck, ReachabilityProber};
use crate::repository::TopologyRepository;
use crate::synthesis::LinkSynthesizer;
use crate::topology::{Topology, TopologyAssembler, validate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Per-run deadline overrides, in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    #[serde(default)]
    pub probe_ms: Option<u64>,
    #[serde(default)]
    pub poll_ms: Option<u64>,
    #[serde(default)]
    pub pipeline_ms: Option<u64>,
}

/// Options bag accepted by [`TopologyGenerator::generate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateOptions {
    pub gateway_address: Option<String>,
    pub protocol_credential: Option<String>,
    pub timeouts: Timeouts,
    pub cache_enabled: bool,
    pub prefer_router_as_central: bool,
    /// Overrides the configured fallback-layer switch for this run.
    pub fallback_links: Option<bool>,
    pub force_recalculation: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            gateway_address: None,
            protocol_credential: None,
            timeouts: Timeouts::default(),
            cache_enabled: true,
            prefer_router_as_central: true,
            fallback_links: None,
            force_recalculation: false,
        }
    }
}

impl GenerateOptions {
    fn election_options(&self) -> ElectionOptions {
        ElectionOptions {
            gateway_ip: self.gateway_address.clone(),
            prefer_router: self.prefer_router_as_central,
            force_recalculation: self.force_recalculation,
        }
    }

    /// The options that change what a run publishes for the same snapshot.
    fn cache_variant(&self, fallback: bool) -> String {
        format!(
            "gateway={}|prefer_router={}|fallback={}|credential={}",
            self.gateway_address.as_deref().unwrap_or("-"),
            self.prefer_router_as_central,
            fallback,
            self.protocol_credential.as_deref().unwrap_or("-")
        )
    }
}

/// Counters and timings collected during a run, returned on success and failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetrics {
    pub device_count: usize,
    pub probes_attempted: usize,
    pub probes_succeeded: usize,
    pub probe_success_rate: f64,
    pub switches_polled: usize,
    pub polls_issued: usize,
    pub polls_failed: usize,
    pub poll_cache_hits: usize,
    pub entries_discarded: usize,
    pub protocol_links: usize,
    pub fallback_links: usize,
    pub logical_links: usize,
    pub central_node_id: Option<String>,
    pub election_from_cache: bool,
    pub from_cache: bool,
    pub probe_ms: u64,
    pub discovery_ms: u64,
    pub synthesis_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub topology: Arc<Topology>,
    pub from_cache: bool,
    pub metrics: GenerationMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCacheStats {
    pub snapshot: CacheStats,
    pub election: CacheStats,
    pub protocol_poll: CacheStats,
}

/// External collaborators the generator is built from.
pub struct Collaborators {
    pub inventory: Arc<dyn DeviceInventory>,
    pub repository: Arc<dyn TopologyRepository>,
    pub liveness: Arc<dyn LivenessCheck>,
    pub transport: Arc<dyn ProtocolTransport>,
    pub vendors: Arc<VendorLookup>,
}

pub struct TopologyGenerator {
    inventory: Arc<dyn DeviceInventory>,
    repository: Arc<dyn TopologyRepository>,
    assembler: TopologyAssembler,
    prober: ReachabilityProber,
    discoverer: LinkDiscoverer,
    elector: CentralNodeElector,
    synthesizer: LinkSynthesizer,
    snapshot_cache: SnapshotCache,
    config: PipelineConfig,
    source: String,
    generation_lock: tokio::sync::Mutex<()>,
    last_reachability: Mutex<HashMap<String, bool>>,
}

impl std::fmt::Debug for TopologyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyGenerator")
            .field("source", &self.source)
            .field("prober", &self.prober)
            .field("discoverer", &self.discoverer)
            .field("elector", &self.elector)
            .finish()
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

impl TopologyGenerator {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        let classifier = Arc::new(DeviceClassifier::with_thresholds(
            collaborators.vendors,
            config.classifier.clone(),
        ));

        Self {
            inventory: collaborators.inventory,
            repository: collaborators.repository,
            assembler: TopologyAssembler::new(classifier),
            prober: ReachabilityProber::new(collaborators.liveness),
            discoverer: LinkDiscoverer::new(collaborators.transport, &config.discovery),
            elector: CentralNodeElector::new(&config.election),
            synthesizer: LinkSynthesizer::new(config.synthesis.clone()),
            snapshot_cache: SnapshotCache::new(
                Duration::from_millis(config.snapshot_cache.ttl_ms),
                config.snapshot_cache.capacity,
            ),
            source: format!("netmap-core/{}", env!("CARGO_PKG_VERSION")),
            generation_lock: tokio::sync::Mutex::new(()),
            last_reachability: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Label recorded as `source` on every topology this generator publishes.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Total forwarding-table polls sent by this generator.
    pub fn polls_issued(&self) -> u64 {
        self.discoverer.polls_issued()
    }

    /// Run the pipeline once. On failure nothing is persisted or cached and
    /// the previous topology stays last-active.
    pub async fn generate(&self, options: GenerateOptions) -> Result<GenerationReport, GenerationError> {
        let _guard = self.generation_lock.lock().await;
        let start = Instant::now();
        let deadline_ms = options
            .timeouts
            .pipeline_ms
            .unwrap_or(self.config.pipeline_timeout_ms)
            .max(1);

        let mut metrics = GenerationMetrics::default();
        let outcome = tokio::time::timeout(
            Duration::from_millis(deadline_ms),
            self.run(&options, &mut metrics, start),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(report)) => return Ok(report),
            Ok(Err(failure)) => failure,
            Err(_) => GenerationFailure::Timeout(deadline_ms),
        };

        metrics.total_ms = elapsed_ms(start);
        tracing::error!(
            "Topology generation failed after {}ms: {} ({} devices, {}/{} probes answered, {} polls failed)",
            metrics.total_ms,
            failure,
            metrics.device_count,
            metrics.probes_succeeded,
            metrics.probes_attempted,
            metrics.polls_failed
        );
        Err(GenerationError::new(failure, metrics))
    }

    async fn run(
        &self,
        options: &GenerateOptions,
        metrics: &mut GenerationMetrics,
        start: Instant,
    ) -> Result<GenerationReport, GenerationFailure> {
        let devices = self.inventory.list_active_devices().await?;
        metrics.device_count = devices.len();
        tracing::info!("Generating topology for {} devices", devices.len());

        let fallback = options
            .fallback_links
            .unwrap_or(self.synthesizer.options().fallback_enabled);
        let variant = options.cache_variant(fallback);

        if options.cache_enabled && !options.force_recalculation {
            if let Some(cached) = self.snapshot_cache.lookup(&devices, &variant) {
                metrics.from_cache = true;
                metrics.central_node_id = cached.topology.central_node_id.clone();
                metrics.total_ms = elapsed_ms(start);
                tracing::info!(
                    "Device snapshot unchanged, returning cached topology {}",
                    cached.topology.id
                );
                return Ok(GenerationReport {
                    topology: cached.topology.clone(),
                    from_cache: true,
                    metrics: metrics.clone(),
                });
            }
        }

        let classified = self.assembler.classify_devices(&devices);
        let effective: Vec<Device> = classified.iter().map(|c| c.device.clone()).collect();

        let stage = Instant::now();
        let mut probe_config = self.config.probe.clone();
        if let Some(timeout_ms) = options.timeouts.probe_ms {
            probe_config = probe_config.with_timeout(timeout_ms);
        }
        let reachability = self.prober.probe_prioritized(&effective, &probe_config).await;
        metrics.probes_attempted = reachability.attempted;
        metrics.probes_succeeded = reachability.succeeded;
        metrics.probe_success_rate = reachability.success_rate();
        metrics.probe_ms = elapsed_ms(stage);

        if let Ok(mut last) = self.last_reachability.lock() {
            *last = reachability.reachable.clone();
        }

        let stage = Instant::now();
        let mut discovery_options = self.config.discovery.clone();
        if let Some(credential) = options.protocol_credential.clone() {
            discovery_options.credential = credential;
        }
        if let Some(timeout_ms) = options.timeouts.poll_ms {
            discovery_options.poll_timeout_ms = timeout_ms;
        }
        let election_options = options.election_options();

        let (discovery, election) = tokio::join!(
            self.discoverer
                .discover(&effective, &reachability, &discovery_options),
            async {
                self.elector
                    .elect(&effective, &reachability.reachable, &election_options)
            }
        );
        metrics.switches_polled = discovery.switches_polled;
        metrics.polls_issued = discovery.polls_issued;
        metrics.polls_failed = discovery.polls_failed;
        metrics.poll_cache_hits = discovery.cache_hits;
        metrics.entries_discarded = discovery.entries_discarded;
        metrics.central_node_id = Some(election.node_id.clone());
        metrics.election_from_cache = election.from_cache;
        metrics.discovery_ms = elapsed_ms(stage);

        let stage = Instant::now();
        let nodes = self
            .assembler
            .build_nodes(&classified, &reachability, &election);
        let synthesis = self
            .synthesizer
            .synthesize_with(&nodes, &discovery.links, fallback);
        metrics.protocol_links = synthesis.protocol_links;
        metrics.fallback_links = synthesis.fallback_links;
        metrics.logical_links = synthesis.logical_links;
        metrics.synthesis_ms = elapsed_ms(stage);

        let version = match self.repository.get_last_active().await {
            Ok(previous) => previous.map(|t| t.version + 1).unwrap_or(1),
            Err(e) => {
                tracing::warn!("Could not read previous topology version: {}", e);
                1
            }
        };

        let topology = self
            .assembler
            .assemble(nodes, synthesis.links, version, &self.source);
        validate(&topology)?;
        self.repository.save(&topology).await?;

        let topology = Arc::new(topology);
        metrics.total_ms = elapsed_ms(start);
        if options.cache_enabled {
            self.snapshot_cache
                .store(&devices, &variant, topology.clone(), metrics.total_ms);
        }

        tracing::info!(
            "Published topology {} v{}: {} nodes, {} links (central {}) in {}ms",
            topology.id,
            topology.version,
            topology.stats.total_nodes,
            topology.stats.total_links,
            topology.central_node_id.as_deref().unwrap_or("none"),
            metrics.total_ms
        );

        Ok(GenerationReport {
            topology,
            from_cache: false,
            metrics: metrics.clone(),
        })
    }

    pub async fn last_topology(&self) -> Result<Option<Topology>, PersistenceError> {
        self.repository.get_last_active().await
    }

    pub async fn topology_by_id(&self, id: &str) -> Result<Option<Topology>, PersistenceError> {
        self.repository.find_by_id(id).await
    }

    /// Delete a stored topology. The snapshot cache is dropped so a deleted
    /// topology is never served again.
    pub async fn delete_topology(&self, id: &str) -> Result<bool, PersistenceError> {
        let deleted = self.repository.delete(id).await?;
        if deleted {
            self.snapshot_cache.clear();
        }
        Ok(deleted)
    }

    pub fn cache_stats(&self) -> PipelineCacheStats {
        PipelineCacheStats {
            snapshot: self.snapshot_cache.stats(),
            election: self.elector.cache_stats(),
            protocol_poll: self.discoverer.cache_stats(),
        }
    }

    pub fn clear_caches(&self) {
        self.snapshot_cache.clear();
        self.elector.clear_cache();
        self.discoverer.clear_cache();
        tracing::info!("Cleared snapshot, election and protocol-poll caches");
    }

    /// Current inventory with roles resolved, and the reachability seen by
    /// the last run. A process that has not run yet falls back to the
    /// reachability recorded in the stored topology.
    async fn election_inputs(
        &self,
        stored: Option<&Topology>,
    ) -> Result<(Vec<Device>, HashMap<String, bool>), InventoryError> {
        let devices = self.inventory.list_active_devices().await?;
        let effective = self
            .assembler
            .classify_devices(&devices)
            .into_iter()
            .map(|c| c.device)
            .collect();
        let mut reachability = self
            .last_reachability
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default();
        if reachability.is_empty() {
            if let Some(topology) = stored {
                reachability = stored_reachability(topology);
            }
        }
        Ok((effective, reachability))
    }

    /// Compare a fresh election with the remembered winner. The in-memory
    /// election cache wins; otherwise the central node of the last-active
    /// topology counts, if it was elected over the same snapshot.
    pub async fn check_election_consistency(
        &self,
        options: &GenerateOptions,
    ) -> Result<ElectionConsistency, GenerationFailure> {
        let stored = self.repository.get_last_active().await?;
        let (devices, reachability) = self.election_inputs(stored.as_ref()).await?;
        let mut consistency =
            self.elector
                .check_consistency(&devices, &reachability, &options.election_options());

        if consistency.cached_central_node_id.is_none() {
            if let Some(central) = stored
                .as_ref()
                .and_then(|t| stored_central_node(t, &consistency.snapshot_hash))
            {
                consistency.is_consistent = central == consistency.current_central_node_id;
                consistency.cached_central_node_id = Some(central);
            }
        }

        if !consistency.is_consistent {
            tracing::warn!(
                "Central node drifted: elected {} but {} is on record",
                consistency.current_central_node_id,
                consistency.cached_central_node_id.as_deref().unwrap_or("none")
            );
        }
        Ok(consistency)
    }

    /// Re-elect ignoring every cache and publish the resulting topology, so
    /// the new winner is on record for later runs and processes.
    pub async fn recalculate_election(
        &self,
        options: &GenerateOptions,
    ) -> Result<GenerationReport, GenerationError> {
        self.generate(GenerateOptions {
            force_recalculation: true,
            ..options.clone()
        })
        .await
    }
}

fn stored_reachability(topology: &Topology) -> HashMap<String, bool> {
    topology
        .nodes
        .iter()
        .filter(|n| !n.is_virtual)
        .filter_map(|n| n.metrics.reachable.map(|up| (n.id.clone(), up)))
        .collect()
}

/// Central node of a stored topology, if its election ran over `snapshot_hash`.
fn stored_central_node(topology: &Topology, snapshot_hash: &str) -> Option<String> {
    let central = topology.central_node()?;
    let hash = central
        .metadata
        .get("election")
        .and_then(|e| e.get("snapshotHash"))
        .and_then(|h| h.as_str())?;
    (hash == snapshot_hash).then(|| central.id.clone())
}

