//! Structural checks run before a topology is published.

use super::Topology;
use crate::error::ValidationError;
use std::collections::HashSet;
use std::net::Ipv4Addr;

fn required(entity: &'static str, id: &str, field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField {
            entity,
            id: id.to_string(),
            field,
        });
    }
    Ok(())
}

fn unit_interval(subject: String, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ValidationError::ConfidenceOutOfRange { subject, value });
    }
    Ok(())
}

/// Check every publication invariant, stopping at the first violation.
///
/// A missing central node is only warned about.
pub fn validate(topology: &Topology) -> Result<(), ValidationError> {
    required("topology", &topology.id, "id", &topology.id)?;
    for node in &topology.nodes {
        required("node", &node.id, "id", &node.id)?;
        required("node", &node.id, "ip", &node.ip)?;
    }
    for link in &topology.links {
        required("link", &link.id, "id", &link.id)?;
        required("link", &link.id, "sourceNodeId", &link.source_node_id)?;
        required("link", &link.id, "targetNodeId", &link.target_node_id)?;
    }

    let mut node_ids = HashSet::with_capacity(topology.nodes.len());
    for node in &topology.nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNode(node.id.clone()));
        }
    }

    for node in &topology.nodes {
        if node.ip.parse::<Ipv4Addr>().is_err() {
            return Err(ValidationError::InvalidIp {
                node_id: node.id.clone(),
                ip: node.ip.clone(),
            });
        }
    }

    for link in &topology.links {
        for endpoint in [&link.source_node_id, &link.target_node_id] {
            if !node_ids.contains(endpoint.as_str()) {
                return Err(ValidationError::DanglingEndpoint {
                    link_id: link.id.clone(),
                    node_id: endpoint.clone(),
                });
            }
        }
        if link.source_node_id == link.target_node_id {
            return Err(ValidationError::SelfLink(link.id.clone()));
        }
    }

    let mut pairs = HashSet::with_capacity(topology.links.len());
    for link in &topology.links {
        if !pairs.insert(link.pair_key()) {
            return Err(ValidationError::DuplicateLink {
                source_id: link.source_node_id.clone(),
                target_id: link.target_node_id.clone(),
            });
        }
    }

    if topology.stats.total_nodes != topology.nodes.len() {
        return Err(ValidationError::StatsMismatch {
            field: "totalNodes",
            recorded: topology.stats.total_nodes,
            actual: topology.nodes.len(),
        });
    }
    if topology.stats.total_links != topology.links.len() {
        return Err(ValidationError::StatsMismatch {
            field: "totalLinks",
            recorded: topology.stats.total_links,
            actual: topology.links.len(),
        });
    }

    for node in &topology.nodes {
        unit_interval(format!("node '{}'", node.id), node.confidence)?;
    }
    unit_interval(
        "stats.meanLinkConfidence".to_string(),
        topology.stats.mean_link_confidence,
    )?;

    match topology.nodes.iter().filter(|n| n.is_central).count() {
        0 => tracing::warn!("Topology {} has no central node", topology.id),
        1 => {}
        n => tracing::warn!("Topology {} has {} central nodes", topology.id, n),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRole;
    use crate::topology::assembler::compute_stats;
    use crate::topology::{ConfidenceLevel, LinkType, NodeMetrics, TopologyLink, TopologyNode};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn node(id: &str, ip: &str) -> TopologyNode {
        TopologyNode {
            id: id.to_string(),
            ip: ip.to_string(),
            mac: None,
            hostname: None,
            os_guess: None,
            vendor: None,
            role: DeviceRole::Switch,
            confidence: 0.5,
            is_central: id == "a",
            is_virtual: false,
            metrics: NodeMetrics::default(),
            metadata: BTreeMap::new(),
        }
    }

    fn link(source: &str, target: &str) -> TopologyLink {
        TopologyLink::new(LinkType::Lan, source, target, ConfidenceLevel::Medium, "test")
    }

    fn topology(nodes: Vec<TopologyNode>, links: Vec<TopologyLink>) -> Topology {
        Topology {
            id: "t1".to_string(),
            version: 1,
            stats: compute_stats(&nodes, &links),
            nodes,
            links,
            central_node_id: Some("a".to_string()),
            created_at: Utc::now(),
            source: "test".to_string(),
        }
    }

    #[test]
    fn test_valid_topology_passes() {
        let t = topology(
            vec![node("a", "10.0.0.1"), node("b", "10.0.0.2")],
            vec![link("a", "b")],
        );
        assert_eq!(validate(&t), Ok(()));
    }

    #[test]
    fn test_missing_field() {
        let t = topology(vec![node("a", " ")], vec![]);
        assert!(matches!(
            validate(&t),
            Err(ValidationError::MissingField { field: "ip", .. })
        ));
    }

    #[test]
    fn test_malformed_ip() {
        let t = topology(vec![node("a", "10.0.0.300")], vec![]);
        assert!(matches!(validate(&t), Err(ValidationError::InvalidIp { .. })));
    }

    #[test]
    fn test_dangling_and_self_links() {
        let t = topology(vec![node("a", "10.0.0.1")], vec![link("a", "ghost")]);
        assert!(matches!(validate(&t), Err(ValidationError::DanglingEndpoint { .. })));

        let t = topology(vec![node("a", "10.0.0.1")], vec![link("a", "a")]);
        assert!(matches!(validate(&t), Err(ValidationError::SelfLink(_))));
    }

    #[test]
    fn test_duplicate_unordered_pair() {
        let t = topology(
            vec![node("a", "10.0.0.1"), node("b", "10.0.0.2")],
            vec![link("a", "b"), link("b", "a")],
        );
        assert!(matches!(validate(&t), Err(ValidationError::DuplicateLink { .. })));
    }

    #[test]
    fn test_stats_mismatch() {
        let mut t = topology(vec![node("a", "10.0.0.1")], vec![]);
        t.stats.total_nodes = 4;
        assert_eq!(
            validate(&t),
            Err(ValidationError::StatsMismatch {
                field: "totalNodes",
                recorded: 4,
                actual: 1
            })
        );
    }

    #[test]
    fn test_confidence_out_of_range() {
        let mut bad = node("a", "10.0.0.1");
        bad.confidence = f64::NAN;
        let t = topology(vec![bad], vec![]);
        assert!(matches!(
            validate(&t),
            Err(ValidationError::ConfidenceOutOfRange { .. })
        ));
    }

    #[test]
    fn test_duplicate_node() {
        let t = topology(vec![node("a", "10.0.0.1"), node("a", "10.0.0.2")], vec![]);
        assert_eq!(validate(&t), Err(ValidationError::DuplicateNode("a".to_string())));
    }

    #[test]
    fn test_missing_central_is_not_an_error() {
        let t = topology(vec![node("b", "10.0.0.2")], vec![]);
        assert!(validate(&t).is_ok());
    }
}
