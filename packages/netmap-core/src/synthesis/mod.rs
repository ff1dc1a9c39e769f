//! Link synthesis
//!
//! Builds the final link set in three layers, each only filling gaps left by
//! the one before:
//! 1. protocol-derived links, verbatim
//! 2. heuristic fallback links for switches with no protocol coverage
//!    (same subnet, priority device type, temporal proximity), when enabled
//! 3. logical router-to-switch uplinks, marked assumed
//!
//! A final pass keeps one link per unordered node pair, highest confidence first.

use crate::device::{DeviceRole, same_subnet};
use crate::topology::{ConfidenceLevel, LinkType, TopologyLink, TopologyNode, pair_key};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisOptions {
    pub fallback_enabled: bool,
    /// Fallback temporal-proximity window around the switch's last sighting.
    pub temporal_window_hours: i64,
    pub priority_types: Vec<DeviceRole>,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            fallback_enabled: false,
            temporal_window_hours: 24,
            priority_types: vec![DeviceRole::Server, DeviceRole::Router, DeviceRole::AccessPoint],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisReport {
    pub links: Vec<TopologyLink>,
    pub protocol_links: usize,
    pub fallback_links: usize,
    pub logical_links: usize,
    /// Candidates dropped because their pair was already linked.
    pub duplicates_dropped: usize,
}

/// Ordered set of links keyed by unordered node pair. A candidate replaces the
/// held link only with strictly higher confidence.
#[derive(Debug, Default)]
struct PairSet {
    links: Vec<TopologyLink>,
    index: HashMap<(String, String), usize>,
    dropped: usize,
}

impl PairSet {
    fn contains(&self, a: &str, b: &str) -> bool {
        self.index.contains_key(&pair_key(a, b))
    }

    fn offer(&mut self, link: TopologyLink) -> bool {
        if link.source_node_id == link.target_node_id {
            self.dropped += 1;
            return false;
        }
        let key = link.pair_key();
        match self.index.get(&key) {
            Some(&idx) => {
                if link.confidence > self.links[idx].confidence {
                    self.links[idx] = link;
                } else {
                    self.dropped += 1;
                }
                false
            }
            None => {
                self.index.insert(key, self.links.len());
                self.links.push(link);
                true
            }
        }
    }

    fn into_links(self) -> Vec<TopologyLink> {
        self.links
    }
}

/// Collapse a link list by unordered pair, highest confidence wins; on equal
/// confidence the earlier link stays.
/// Last sighting, if the inventory actually reported one. Missing stats
/// deserialize to the epoch, which is no evidence of co-occurrence.
fn observed_at(node: &TopologyNode) -> Option<DateTime<Utc>> {
    node.metrics
        .last_seen
        .filter(|seen| *seen != DateTime::<Utc>::UNIX_EPOCH)
}

pub fn dedupe_links(links: impl IntoIterator<Item = TopologyLink>) -> Vec<TopologyLink> {
    let mut set = PairSet::default();
    for link in links {
        set.offer(link);
    }
    set.into_links()
}

#[derive(Debug, Clone, Default)]
pub struct LinkSynthesizer {
    options: SynthesisOptions,
}

impl LinkSynthesizer {
    pub fn new(options: SynthesisOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SynthesisOptions {
        &self.options
    }

    pub fn synthesize(
        &self,
        nodes: &[TopologyNode],
        protocol_links: &[TopologyLink],
    ) -> SynthesisReport {
        self.synthesize_with(nodes, protocol_links, self.options.fallback_enabled)
    }

    /// As [`synthesize`](Self::synthesize), overriding whether the fallback layer runs.
    pub fn synthesize_with(
        &self,
        nodes: &[TopologyNode],
        protocol_links: &[TopologyLink],
        fallback_enabled: bool,
    ) -> SynthesisReport {
        let node_ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut set = PairSet::default();
        let mut report = SynthesisReport::default();

        for link in protocol_links {
            if !node_ids.contains(link.source_node_id.as_str())
                || !node_ids.contains(link.target_node_id.as_str())
            {
                tracing::debug!("Dropping protocol link {} with unknown endpoint", link.id);
                set.dropped += 1;
                continue;
            }
            if set.offer(link.clone()) {
                report.protocol_links += 1;
            }
        }

        if fallback_enabled {
            let covered: HashSet<&str> = protocol_links
                .iter()
                .flat_map(|l| [l.source_node_id.as_str(), l.target_node_id.as_str()])
                .collect();

            for switch in nodes
                .iter()
                .filter(|n| n.role.is_switch_class() && !covered.contains(n.id.as_str()))
            {
                for link in dedupe_links(self.fallback_candidates(switch, nodes)) {
                    if set.contains(&link.source_node_id, &link.target_node_id) {
                        set.dropped += 1;
                        continue;
                    }
                    if set.offer(link) {
                        report.fallback_links += 1;
                    }
                }
            }
        }

        let routers: Vec<&TopologyNode> =
            nodes.iter().filter(|n| n.role == DeviceRole::Router).collect();
        let switches: Vec<&TopologyNode> =
            nodes.iter().filter(|n| n.role.is_switch_class()).collect();

        for router in &routers {
            for switch in &switches {
                if set.contains(&router.id, &switch.id) {
                    continue;
                }
                let mut link = TopologyLink::new(
                    LinkType::Assumed,
                    &router.id,
                    &switch.id,
                    ConfidenceLevel::Medium,
                    "logical uplink: routers are expected to connect to every switch",
                );
                link.is_assumed = true;
                link.is_virtual = router.is_virtual || switch.is_virtual;
                if set.offer(link) {
                    report.logical_links += 1;
                }
            }
        }

        report.duplicates_dropped = set.dropped;
        report.links = set.into_links();

        tracing::debug!(
            "Synthesized {} links ({} protocol, {} fallback, {} logical, {} dropped)",
            report.links.len(),
            report.protocol_links,
            report.fallback_links,
            report.logical_links,
            report.duplicates_dropped
        );
        report
    }

    /// Every heuristic link candidate from `switch` to the other nodes.
    fn fallback_candidates(&self, switch: &TopologyNode, nodes: &[TopologyNode]) -> Vec<TopologyLink> {
        let window = chrono::Duration::hours(self.options.temporal_window_hours);
        let mut candidates = Vec::new();

        for other in nodes.iter().filter(|n| n.id != switch.id) {
            if same_subnet(&switch.ip, &other.ip) {
                candidates.push(TopologyLink::new(
                    LinkType::SubnetInferred,
                    &switch.id,
                    &other.id,
                    ConfidenceLevel::Medium,
                    format!("same subnet as switch {}", switch.ip),
                ));
            }

            if self.options.priority_types.contains(&other.role) {
                candidates.push(TopologyLink::new(
                    LinkType::Lan,
                    &switch.id,
                    &other.id,
                    ConfidenceLevel::Medium,
                    format!("priority type {}", other.role),
                ));
            }

            if let (Some(a), Some(b)) = (observed_at(switch), observed_at(other)) {
                if (a - b).abs() <= window {
                    candidates.push(TopologyLink::new(
                        LinkType::Lan,
                        &switch.id,
                        &other.id,
                        ConfidenceLevel::Low,
                        format!(
                            "temporal proximity: seen within {}h of switch",
                            self.options.temporal_window_hours
                        ),
                    ));
                }
            }
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::NodeMetrics;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn node(id: &str, ip: &str, role: DeviceRole) -> TopologyNode {
        TopologyNode {
            id: id.to_string(),
            ip: ip.to_string(),
            mac: None,
            hostname: None,
            os_guess: None,
            vendor: None,
            role,
            confidence: 0.9,
            is_central: false,
            is_virtual: false,
            metrics: NodeMetrics {
                last_seen: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
                ..NodeMetrics::default()
            },
            metadata: BTreeMap::new(),
        }
    }

    fn protocol(source: &str, target: &str) -> TopologyLink {
        TopologyLink::new(
            LinkType::ProtocolDerived,
            source,
            target,
            ConfidenceLevel::High,
            "bridge table",
        )
    }

    fn pairs(links: &[TopologyLink]) -> HashSet<(String, String)> {
        links.iter().map(|l| l.pair_key()).collect()
    }

    #[test]
    fn test_router_switch_logical_links() {
        let nodes = vec![
            node("r1", "10.0.0.1", DeviceRole::Router),
            node("s1", "10.0.0.2", DeviceRole::Switch),
            node("s2", "10.0.0.3", DeviceRole::Switch),
        ];
        let report = LinkSynthesizer::default().synthesize(&nodes, &[]);

        assert_eq!(report.links.len(), 2);
        assert_eq!(report.logical_links, 2);
        for link in &report.links {
            assert_eq!(link.source_node_id, "r1");
            assert_eq!(link.confidence, ConfidenceLevel::Medium);
            assert!(link.is_assumed);
            assert_eq!(link.link_type, LinkType::Assumed);
        }
    }

    #[test]
    fn test_protocol_link_beats_fallback_and_logical() {
        let nodes = vec![
            node("r1", "10.0.0.1", DeviceRole::Router),
            node("s1", "10.0.0.2", DeviceRole::Switch),
            node("srv", "10.0.0.9", DeviceRole::Server),
        ];
        let protocol_links = vec![protocol("s1", "r1"), protocol("r1", "s1")];

        let report = LinkSynthesizer::default().synthesize_with(&nodes, &protocol_links, true);

        assert_eq!(report.protocol_links, 1);
        assert_eq!(report.links.len(), 1);
        assert_eq!(report.links[0].link_type, LinkType::ProtocolDerived);
        assert_eq!(report.links[0].source_node_id, "s1");
    }

    #[test]
    fn test_fallback_fills_uncovered_switch() {
        let nodes = vec![
            node("s1", "10.0.0.2", DeviceRole::Switch),
            node("pc", "10.0.0.50", DeviceRole::Workstation),
            node("far-srv", "10.9.9.9", DeviceRole::Server),
            node("far-pc", "10.9.9.10", DeviceRole::Workstation),
        ];
        let mut stale = node("old", "10.8.0.1", DeviceRole::Printer);
        stale.metrics.last_seen = Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        let mut all = nodes.clone();
        all.push(stale);

        let report = LinkSynthesizer::default().synthesize_with(&all, &[], true);
        let by_target: HashMap<&str, &TopologyLink> = report
            .links
            .iter()
            .map(|l| (l.target_node_id.as_str(), l))
            .collect();

        assert_eq!(by_target["pc"].link_type, LinkType::SubnetInferred);
        assert_eq!(by_target["pc"].confidence, ConfidenceLevel::Medium);
        assert_eq!(by_target["far-srv"].confidence, ConfidenceLevel::Medium);
        assert_eq!(by_target["far-pc"].confidence, ConfidenceLevel::Low);
        assert!(!by_target.contains_key("old"));
        assert_eq!(report.fallback_links, 3);
    }

    #[test]
    fn test_unknown_last_seen_is_not_temporal_evidence() {
        let mut switch = node("s1", "10.0.0.2", DeviceRole::Switch);
        let mut pc = node("pc", "10.5.0.50", DeviceRole::Workstation);
        switch.metrics.last_seen = Some(DateTime::<Utc>::UNIX_EPOCH);
        pc.metrics.last_seen = Some(DateTime::<Utc>::UNIX_EPOCH);
        let mut unseen = node("tv", "10.6.0.7", DeviceRole::Iot);
        unseen.metrics.last_seen = None;

        let report = LinkSynthesizer::default().synthesize_with(&[switch, pc, unseen], &[], true);

        assert!(report.links.is_empty());
        assert_eq!(report.fallback_links, 0);
    }

    #[test]
    fn test_fallback_disabled_by_default() {
        let nodes = vec![
            node("s1", "10.0.0.2", DeviceRole::Switch),
            node("pc", "10.0.0.50", DeviceRole::Workstation),
        ];
        let report = LinkSynthesizer::default().synthesize(&nodes, &[]);
        assert!(report.links.is_empty());
    }

    #[test]
    fn test_no_pair_appears_twice() {
        let nodes: Vec<TopologyNode> = vec![
            node("r1", "10.0.0.1", DeviceRole::Router),
            node("r2", "10.0.0.254", DeviceRole::Router),
            node("s1", "10.0.0.2", DeviceRole::Switch),
            node("s2", "10.0.0.3", DeviceRole::Switch),
            node("ap", "10.0.0.4", DeviceRole::AccessPoint),
            node("pc", "10.0.0.5", DeviceRole::Workstation),
        ];
        let protocol_links = vec![protocol("s1", "pc"), protocol("s1", "s2"), protocol("s2", "s1")];
        let report = LinkSynthesizer::default().synthesize_with(&nodes, &protocol_links, true);

        assert_eq!(pairs(&report.links).len(), report.links.len());
        assert!(report.links.iter().all(|l| l.source_node_id != l.target_node_id));
    }

    #[test]
    fn test_dedupe_prefers_higher_confidence() {
        let low = TopologyLink::new(LinkType::Lan, "a", "b", ConfidenceLevel::Low, "low");
        let high = protocol("b", "a");
        let kept = dedupe_links(vec![low, high]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, ConfidenceLevel::High);
    }
}
