//! Turns classified devices, reachability, the election winner and the
//! synthesized links into a `Topology`.

use super::{ConfidenceLevel, LinkType, NodeMetrics, Topology, TopologyLink, TopologyNode, TopologyStats};
use crate::classifier::{ClassificationResult, DeviceClassifier};
use crate::device::{Device, DeviceRole};
use crate::election::ElectionResult;
use crate::probe::ProbeReport;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Confidence recorded for a role the inventory supplied and the classifier
/// did not confirm.
const INVENTORY_ROLE_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleSource {
    Inventory,
    Classifier,
}

/// A device with its role resolved, plus the evidence behind it.
#[derive(Debug, Clone)]
pub struct ClassifiedDevice {
    /// The inventory device with `role` replaced by the resolved role.
    pub device: Device,
    pub classification: ClassificationResult,
    pub role_source: RoleSource,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct TopologyAssembler {
    classifier: Arc<DeviceClassifier>,
}

impl TopologyAssembler {
    pub fn new(classifier: Arc<DeviceClassifier>) -> Self {
        Self { classifier }
    }

    /// Resolve each device's role. A role supplied by the inventory wins over
    /// the classifier unless it is `unknown`.
    pub fn classify_devices(&self, devices: &[Device]) -> Vec<ClassifiedDevice> {
        devices
            .iter()
            .map(|device| {
                let classification = self.classifier.classify_device(device);
                let mut resolved = device.clone();

                if resolved.vendor.is_none() {
                    resolved.vendor = device
                        .mac
                        .as_deref()
                        .and_then(|mac| self.classifier.vendors().vendor_name(mac));
                }

                let (role_source, confidence) = if device.role != DeviceRole::Unknown {
                    let confidence = if classification.role == device.role {
                        classification.confidence.max(INVENTORY_ROLE_CONFIDENCE)
                    } else {
                        INVENTORY_ROLE_CONFIDENCE
                    };
                    (RoleSource::Inventory, confidence)
                } else {
                    resolved.role = classification.role;
                    (RoleSource::Classifier, classification.confidence)
                };

                tracing::trace!(
                    "{} ({}): {} via {} ({:.2})",
                    device.id,
                    device.ip,
                    resolved.role,
                    classification.method.as_str(),
                    classification.confidence
                );

                ClassifiedDevice {
                    device: resolved,
                    classification,
                    role_source,
                    confidence,
                }
            })
            .collect()
    }

    /// One node per device, plus the virtual gateway when the election
    /// produced one. Exactly the elected node is flagged central.
    pub fn build_nodes(
        &self,
        classified: &[ClassifiedDevice],
        reachability: &ProbeReport,
        election: &ElectionResult,
    ) -> Vec<TopologyNode> {
        let mut nodes: Vec<TopologyNode> = classified
            .iter()
            .map(|c| {
                let device = &c.device;
                let mut metadata = BTreeMap::new();
                metadata.insert(
                    "classification".to_string(),
                    json!({
                        "role": c.classification.role,
                        "confidence": c.classification.confidence,
                        "method": c.classification.method,
                        "evidence": c.classification.evidence,
                    }),
                );
                metadata.insert("roleSource".to_string(), json!(c.role_source));

                TopologyNode {
                    id: device.id.clone(),
                    ip: device.ip.clone(),
                    mac: device.mac.clone(),
                    hostname: device.hostname.clone(),
                    os_guess: device.os_guess.clone(),
                    vendor: device.vendor.clone(),
                    role: device.role,
                    confidence: c.confidence.clamp(0.0, 1.0),
                    is_central: false,
                    is_virtual: false,
                    metrics: NodeMetrics {
                        load: device.stats.load,
                        bandwidth_mbps: device.stats.bandwidth_mbps,
                        response_time_ms: reachability
                            .response_times
                            .get(&device.id)
                            .copied()
                            .or(device.stats.response_time_ms),
                        reachable: reachability.reachable.get(&device.id).copied(),
                        last_seen: Some(device.stats.last_seen),
                    },
                    metadata,
                }
            })
            .collect();

        let election_meta = json!({
            "reasoning": election.reasoning,
            "confidence": election.confidence,
            "snapshotHash": election.snapshot_hash,
            "fromCache": election.from_cache,
            "scores": election.scores,
        });

        match nodes.iter_mut().find(|n| n.id == election.node_id) {
            Some(node) => {
                node.is_central = true;
                node.metadata.insert("election".to_string(), election_meta);
            }
            None => {
                let mut metadata = BTreeMap::new();
                metadata.insert("election".to_string(), election_meta);
                nodes.push(TopologyNode {
                    id: election.node_id.clone(),
                    ip: election.ip.clone(),
                    mac: None,
                    hostname: None,
                    os_guess: None,
                    vendor: None,
                    role: election.role,
                    confidence: ConfidenceLevel::Low.score(),
                    is_central: true,
                    is_virtual: election.is_virtual,
                    metrics: NodeMetrics::default(),
                    metadata,
                });
            }
        }

        nodes
    }

    /// Wrap nodes and links with freshly computed stats.
    pub fn assemble(
        &self,
        nodes: Vec<TopologyNode>,
        links: Vec<TopologyLink>,
        version: u32,
        source: &str,
    ) -> Topology {
        let stats = compute_stats(&nodes, &links);
        let central_node_id = nodes.iter().find(|n| n.is_central).map(|n| n.id.clone());

        Topology {
            id: uuid::Uuid::new_v4().to_string(),
            version,
            nodes,
            links,
            stats,
            central_node_id,
            created_at: Utc::now(),
            source: source.to_string(),
        }
    }
}

pub fn compute_stats(nodes: &[TopologyNode], links: &[TopologyLink]) -> TopologyStats {
    let mean_link_confidence = if links.is_empty() {
        0.0
    } else {
        links.iter().map(|l| l.confidence.score()).sum::<f64>() / links.len() as f64
    };

    TopologyStats {
        total_nodes: nodes.len(),
        total_links: links.len(),
        mean_link_confidence,
        protocol_links: links
            .iter()
            .filter(|l| l.link_type == LinkType::ProtocolDerived)
            .count(),
        fallback_links: links
            .iter()
            .filter(|l| l.link_type != LinkType::ProtocolDerived && !l.is_assumed)
            .count(),
        assumed_links: links.iter().filter(|l| l.is_assumed).count(),
        reachable_nodes: nodes
            .iter()
            .filter(|n| n.metrics.reachable == Some(true))
            .count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::oui::{StaticVendorTable, VendorLookup};

    fn assembler() -> TopologyAssembler {
        let vendors = VendorLookup::new(StaticVendorTable::new([("00:17:F2", "Cisco Systems, Inc.")]));
        TopologyAssembler::new(Arc::new(DeviceClassifier::new(Arc::new(vendors))))
    }

    fn election_for(node_id: &str, ip: &str, is_virtual: bool) -> ElectionResult {
        ElectionResult {
            node_id: node_id.to_string(),
            ip: ip.to_string(),
            role: DeviceRole::Router,
            is_virtual,
            confidence: ConfidenceLevel::Medium,
            reasoning: "test".to_string(),
            snapshot_hash: "abc".to_string(),
            from_cache: false,
            scores: None,
        }
    }

    #[test]
    fn test_inventory_role_wins_but_classification_is_recorded() {
        let devices = vec![
            Device::new("gw", "10.0.0.1")
                .with_role(DeviceRole::Router)
                .with_hostname("iphone-of-bob"),
            Device::new("p", "10.0.0.7").with_hostname("iphone-of-alice"),
        ];
        let classified = assembler().classify_devices(&devices);

        assert_eq!(classified[0].device.role, DeviceRole::Router);
        assert_eq!(classified[0].role_source, RoleSource::Inventory);
        assert_eq!(classified[0].classification.role, DeviceRole::Mobile);
        assert_eq!(classified[1].device.role, DeviceRole::Mobile);
        assert_eq!(classified[1].role_source, RoleSource::Classifier);
    }

    #[test]
    fn test_vendor_filled_from_hardware_address() {
        let devices = vec![Device::new("sw", "10.0.0.2").with_mac("00:17:f2:aa:bb:cc")];
        let classified = assembler().classify_devices(&devices);
        assert_eq!(classified[0].device.vendor.as_deref(), Some("Cisco Systems, Inc."));
    }

    #[test]
    fn test_exactly_one_central_node() {
        let a = assembler();
        let devices = vec![
            Device::new("r1", "10.0.0.1").with_role(DeviceRole::Router),
            Device::new("pc", "10.0.0.9").with_role(DeviceRole::Workstation),
        ];
        let classified = a.classify_devices(&devices);

        let nodes = a.build_nodes(&classified, &ProbeReport::default(), &election_for("r1", "10.0.0.1", false));
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes.iter().filter(|n| n.is_central).count(), 1);
        assert!(nodes[0].metadata.contains_key("election"));

        let nodes = a.build_nodes(
            &classified,
            &ProbeReport::default(),
            &election_for("virtual-gateway-10.0.0.254", "10.0.0.254", true),
        );
        assert_eq!(nodes.len(), 3);
        let central: Vec<_> = nodes.iter().filter(|n| n.is_central).collect();
        assert_eq!(central.len(), 1);
        assert!(central[0].is_virtual);
    }

    #[test]
    fn test_stats_match_contents() {
        let a = assembler();
        let devices = vec![
            Device::new("r1", "10.0.0.1").with_role(DeviceRole::Router),
            Device::new("s1", "10.0.0.2").with_role(DeviceRole::Switch),
        ];
        let classified = a.classify_devices(&devices);
        let mut reach = ProbeReport::default();
        reach.reachable.insert("r1".to_string(), true);
        reach.reachable.insert("s1".to_string(), false);

        let nodes = a.build_nodes(&classified, &reach, &election_for("r1", "10.0.0.1", false));
        let mut assumed = TopologyLink::new(LinkType::Assumed, "r1", "s1", ConfidenceLevel::Medium, "uplink");
        assumed.is_assumed = true;

        let topology = a.assemble(nodes, vec![assumed], 3, "test");
        assert_eq!(topology.stats.total_nodes, 2);
        assert_eq!(topology.stats.total_links, 1);
        assert_eq!(topology.stats.assumed_links, 1);
        assert_eq!(topology.stats.fallback_links, 0);
        assert_eq!(topology.stats.reachable_nodes, 1);
        assert!((topology.stats.mean_link_confidence - 0.6).abs() < 1e-9);
        assert_eq!(topology.central_node_id.as_deref(), Some("r1"));
        assert_eq!(topology.version, 3);
    }
}
