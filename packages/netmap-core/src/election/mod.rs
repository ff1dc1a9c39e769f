//! Central node election
//!
//! Picks the one router, switch or server most likely to anchor the topology.
//! Candidates are ranked by a *stable* score (centrality and type only) so a
//! flaky liveness check cannot flip the winner between runs; the volatile
//! *total* score, which also counts connectivity, only breaks near-ties.
//! Winners are cached against a hash of the candidate set.

use crate::cache::{CacheStats, TtlCache, hash_parts};
use crate::device::{Device, DeviceRole, gateway_guess, same_subnet};
use crate::topology::ConfidenceLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub const VIRTUAL_GATEWAY_PREFIX: &str = "virtual-gateway-";

const CONNECTIVITY_WEIGHT: f64 = 0.4;
const CENTRALITY_WEIGHT: f64 = 0.3;
const TYPE_WEIGHT: f64 = 0.3;
const STABLE_CENTRALITY_WEIGHT: f64 = 0.5;
const STABLE_TYPE_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionOptions {
    #[serde(default)]
    pub gateway_ip: Option<String>,
    #[serde(default)]
    pub prefer_router: bool,
    #[serde(default)]
    pub force_recalculation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    pub cache_ttl_ms: u64,
    pub cache_capacity: usize,
    /// Stable scores closer than this are a near-tie.
    pub tie_epsilon: f64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 30 * 60 * 1000,
            cache_capacity: 64,
            tie_epsilon: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateScores {
    pub connectivity: f64,
    pub centrality: f64,
    pub type_score: f64,
    pub total: f64,
    pub stable: f64,
}

/// Transient scoring record for one eligible device.
#[derive(Debug, Clone)]
pub struct CentralNodeCandidate<'a> {
    pub device: &'a Device,
    pub scores: CandidateScores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionResult {
    pub node_id: String,
    pub ip: String,
    pub role: DeviceRole,
    pub is_virtual: bool,
    pub confidence: ConfidenceLevel,
    pub reasoning: String,
    pub snapshot_hash: String,
    pub from_cache: bool,
    #[serde(default)]
    pub scores: Option<CandidateScores>,
}

/// What the election cache remembers per snapshot hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedCentralNode {
    pub node_id: String,
    pub snapshot_hash: String,
    pub confidence: ConfidenceLevel,
    pub reasoning: String,
    pub scores: Option<CandidateScores>,
    pub elected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionConsistency {
    pub is_consistent: bool,
    pub current_central_node_id: String,
    pub cached_central_node_id: Option<String>,
    pub snapshot_hash: String,
}

/// Hash over the sorted `(id, role, ip)` tuples of election-eligible devices.
pub fn snapshot_hash(devices: &[Device]) -> String {
    let mut parts: Vec<String> = devices
        .iter()
        .filter(|d| d.role.is_central_candidate())
        .map(|d| format!("{}|{}|{}", d.id, d.role, d.ip))
        .collect();
    parts.sort();
    hash_parts(parts)
}

/// Reachability plus recency of the last observation.
pub fn connectivity_score(device: &Device, reachable: bool, now: DateTime<Utc>) -> f64 {
    let mut score = if reachable { 0.6 } else { 0.0 };
    let age = now.signed_duration_since(device.stats.last_seen);
    if age <= chrono::Duration::minutes(5) {
        score += 0.4;
    } else if age <= chrono::Duration::hours(1) {
        score += 0.25;
    } else if age <= chrono::Duration::hours(24) {
        score += 0.1;
    }
    score
}

/// Banded count of other devices on the same /24.
pub fn centrality_score(device: &Device, devices: &[Device]) -> f64 {
    let peers = devices
        .iter()
        .filter(|d| d.id != device.id && same_subnet(&d.ip, &device.ip))
        .count();
    match peers {
        0 => 0.1,
        1..=4 => 0.4,
        5..=19 => 0.7,
        _ => 1.0,
    }
}

pub fn type_score(role: DeviceRole, prefer_router: bool) -> f64 {
    match role {
        DeviceRole::Router if prefer_router => 1.0,
        DeviceRole::Router => 0.9,
        DeviceRole::Switch => 0.7,
        DeviceRole::Server => 0.4,
        _ => 0.0,
    }
}

pub fn score_candidate(
    device: &Device,
    devices: &[Device],
    reachable: bool,
    prefer_router: bool,
    now: DateTime<Utc>,
) -> CandidateScores {
    let connectivity = connectivity_score(device, reachable, now);
    let centrality = centrality_score(device, devices);
    let type_score = type_score(device.role, prefer_router);
    CandidateScores {
        connectivity,
        centrality,
        type_score,
        total: CONNECTIVITY_WEIGHT * connectivity
            + CENTRALITY_WEIGHT * centrality
            + TYPE_WEIGHT * type_score,
        stable: STABLE_CENTRALITY_WEIGHT * centrality + STABLE_TYPE_WEIGHT * type_score,
    }
}

/// Rank by stable score; among candidates within `epsilon` of the best
/// remaining stable score the higher total wins, then the lower id.
pub fn rank_candidates<'a>(
    mut remaining: Vec<CentralNodeCandidate<'a>>,
    epsilon: f64,
) -> Vec<CentralNodeCandidate<'a>> {
    let mut ranked = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let top_stable = remaining
            .iter()
            .map(|c| c.scores.stable)
            .fold(f64::NEG_INFINITY, f64::max);

        let pick = remaining
            .iter()
            .enumerate()
            .filter(|(_, c)| top_stable - c.scores.stable < epsilon)
            .max_by(|(_, a), (_, b)| {
                a.scores
                    .total
                    .total_cmp(&b.scores.total)
                    .then_with(|| b.device.id.cmp(&a.device.id))
            })
            .map(|(idx, _)| idx)
            .unwrap_or(0);

        ranked.push(remaining.remove(pick));
    }

    ranked
}

pub struct CentralNodeElector {
    cache: TtlCache<String, CachedCentralNode>,
    tie_epsilon: f64,
}

impl std::fmt::Debug for CentralNodeElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralNodeElector")
            .field("cache", &self.cache.stats())
            .field("tie_epsilon", &self.tie_epsilon)
            .finish()
    }
}

impl CentralNodeElector {
    pub fn new(config: &ElectionConfig) -> Self {
        Self {
            cache: TtlCache::new(
                Duration::from_millis(config.cache_ttl_ms),
                config.cache_capacity,
            ),
            tie_epsilon: config.tie_epsilon,
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Elect the central node. Never fails: with nothing eligible a virtual
    /// gateway is synthesized.
    pub fn elect(
        &self,
        devices: &[Device],
        reachability: &HashMap<String, bool>,
        options: &ElectionOptions,
    ) -> ElectionResult {
        let hash = snapshot_hash(devices);

        if let Some(gateway_ip) = options.gateway_ip.as_deref() {
            return explicit_gateway(devices, gateway_ip, hash);
        }

        if !options.force_recalculation {
            if let Some(cached) = self.cache.get(&hash) {
                if let Some(device) = devices.iter().find(|d| d.id == cached.node_id) {
                    tracing::debug!("Election cache hit {} -> {}", hash, device.id);
                    return ElectionResult {
                        node_id: device.id.clone(),
                        ip: device.ip.clone(),
                        role: device.role,
                        is_virtual: false,
                        confidence: cached.confidence,
                        reasoning: cached.reasoning,
                        snapshot_hash: hash,
                        from_cache: true,
                        scores: cached.scores,
                    };
                }
                tracing::debug!(
                    "Cached central node {} no longer present, re-electing",
                    cached.node_id
                );
            }
        }

        let result = self.compute(devices, reachability, options.prefer_router, hash);

        if !result.is_virtual {
            self.cache.insert(
                result.snapshot_hash.clone(),
                CachedCentralNode {
                    node_id: result.node_id.clone(),
                    snapshot_hash: result.snapshot_hash.clone(),
                    confidence: result.confidence,
                    reasoning: result.reasoning.clone(),
                    scores: result.scores,
                    elected_at: Utc::now(),
                },
            );
        }

        tracing::info!(
            "Central node: {} ({}, {}, confidence {})",
            result.node_id,
            result.ip,
            result.role,
            result.confidence
        );
        result
    }

    /// Compare a fresh election with the cached winner, without touching the cache.
    pub fn check_consistency(
        &self,
        devices: &[Device],
        reachability: &HashMap<String, bool>,
        options: &ElectionOptions,
    ) -> ElectionConsistency {
        let hash = snapshot_hash(devices);
        let current = match options.gateway_ip.as_deref() {
            Some(gateway_ip) => explicit_gateway(devices, gateway_ip, hash.clone()),
            None => self.compute(devices, reachability, options.prefer_router, hash.clone()),
        };
        let cached = self.cache.peek(&hash).map(|c| c.node_id);

        ElectionConsistency {
            is_consistent: cached.as_ref().is_none_or(|id| *id == current.node_id),
            current_central_node_id: current.node_id,
            cached_central_node_id: cached,
            snapshot_hash: hash,
        }
    }

    /// Score, rank and pick, ignoring the cache.
    fn compute(
        &self,
        devices: &[Device],
        reachability: &HashMap<String, bool>,
        prefer_router: bool,
        hash: String,
    ) -> ElectionResult {
        let now = Utc::now();
        let candidates: Vec<CentralNodeCandidate> = devices
            .iter()
            .filter(|d| d.role.is_central_candidate())
            .map(|device| CentralNodeCandidate {
                device,
                scores: score_candidate(
                    device,
                    devices,
                    reachability.get(&device.id).copied().unwrap_or(false),
                    prefer_router,
                    now,
                ),
            })
            .collect();

        let ranked = rank_candidates(candidates, self.tie_epsilon);
        let Some(winner) = ranked.first() else {
            return virtual_gateway(devices, hash);
        };

        let s = winner.scores;
        let runner_up = ranked
            .get(1)
            .map(|c| format!("; runner-up {} (stable {:.2})", c.device.id, c.scores.stable))
            .unwrap_or_default();

        ElectionResult {
            node_id: winner.device.id.clone(),
            ip: winner.device.ip.clone(),
            role: winner.device.role,
            is_virtual: false,
            confidence: ConfidenceLevel::from_score(s.stable),
            reasoning: format!(
                "{} of {} candidates: stable {:.2} (centrality {:.2}, type {:.2}), total {:.2} (connectivity {:.2}){}",
                winner.device.role,
                ranked.len(),
                s.stable,
                s.centrality,
                s.type_score,
                s.total,
                s.connectivity,
                runner_up
            ),
            snapshot_hash: hash,
            from_cache: false,
            scores: Some(s),
        }
    }
}

/// Operator-supplied gateway: the matching device if there is one, else a
/// virtual node wrapping the address.
fn explicit_gateway(devices: &[Device], gateway_ip: &str, hash: String) -> ElectionResult {
    if let Some(device) = devices.iter().find(|d| d.ip == gateway_ip) {
        return ElectionResult {
            node_id: device.id.clone(),
            ip: device.ip.clone(),
            role: device.role,
            is_virtual: false,
            confidence: ConfidenceLevel::Low,
            reasoning: format!("explicit gateway {} matches device {}", gateway_ip, device.id),
            snapshot_hash: hash,
            from_cache: false,
            scores: None,
        };
    }

    ElectionResult {
        node_id: format!("{}{}", VIRTUAL_GATEWAY_PREFIX, gateway_ip),
        ip: gateway_ip.to_string(),
        role: DeviceRole::Router,
        is_virtual: true,
        confidence: ConfidenceLevel::Low,
        reasoning: format!("explicit gateway {} (not in inventory)", gateway_ip),
        snapshot_hash: hash,
        from_cache: false,
        scores: None,
    }
}

/// No eligible candidates: a placeholder router at `a.b.c.1` of the first
/// device with an IPv4 address.
fn virtual_gateway(devices: &[Device], hash: String) -> ElectionResult {
    let ip = devices
        .iter()
        .find_map(|d| gateway_guess(&d.ip))
        .unwrap_or_else(|| "0.0.0.0".to_string());

    tracing::warn!("No router, switch or server found; using virtual gateway {}", ip);

    ElectionResult {
        node_id: format!("{}{}", VIRTUAL_GATEWAY_PREFIX, ip),
        ip: ip.clone(),
        role: DeviceRole::Router,
        is_virtual: true,
        confidence: ConfidenceLevel::Low,
        reasoning: format!("no router, switch or server candidates; assumed gateway {}", ip),
        snapshot_hash: hash,
        from_cache: false,
        scores: None,
    }
}
