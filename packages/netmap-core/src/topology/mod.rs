//! Published topology graph: nodes, links and aggregate stats.

pub mod assembler;
pub mod validator;

pub use assembler::TopologyAssembler;
pub use validator::validate;

use crate::device::DeviceRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Coarse trust level. Ordered `Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    /// Numeric value used for the mean-confidence stat.
    pub fn score(&self) -> f64 {
        match self {
            ConfidenceLevel::Low => 0.3,
            ConfidenceLevel::Medium => 0.6,
            ConfidenceLevel::High => 0.9,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }

    /// Bucket a continuous score: > 0.8 high, > 0.5 medium, else low.
    pub fn from_score(score: f64) -> Self {
        if score > 0.8 {
            ConfidenceLevel::High
        } else if score > 0.5 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkType {
    #[serde(rename = "LAN")]
    Lan,
    #[serde(rename = "WAN")]
    Wan,
    #[serde(rename = "WIFI")]
    Wifi,
    #[serde(rename = "VLAN")]
    Vlan,
    ProtocolDerived,
    SubnetInferred,
    Assumed,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Lan => "LAN",
            LinkType::Wan => "WAN",
            LinkType::Wifi => "WIFI",
            LinkType::Vlan => "VLAN",
            LinkType::ProtocolDerived => "protocol-derived",
            LinkType::SubnetInferred => "subnet-inferred",
            LinkType::Assumed => "assumed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyLink {
    pub id: String,
    pub source_node_id: String,
    pub target_node_id: String,
    pub link_type: LinkType,
    pub confidence: ConfidenceLevel,
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub is_assumed: bool,
    #[serde(default)]
    pub port: Option<u32>,
    #[serde(default)]
    pub bandwidth_mbps: Option<f64>,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    pub reasoning: String,
}

impl TopologyLink {
    /// Deterministic id for a directed link.
    pub fn link_id(link_type: LinkType, source: &str, target: &str) -> String {
        format!("{}:{}->{}", link_type.as_str(), source, target)
    }

    pub fn new(
        link_type: LinkType,
        source: &str,
        target: &str,
        confidence: ConfidenceLevel,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: Self::link_id(link_type, source, target),
            source_node_id: source.to_string(),
            target_node_id: target.to_string(),
            link_type,
            confidence,
            is_virtual: false,
            is_assumed: false,
            port: None,
            bandwidth_mbps: None,
            latency_ms: None,
            reasoning: reasoning.into(),
        }
    }

    /// Endpoints in sorted order, identifying the unordered pair.
    pub fn pair_key(&self) -> (String, String) {
        pair_key(&self.source_node_id, &self.target_node_id)
    }
}

pub fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    pub load: f64,
    pub bandwidth_mbps: f64,
    #[serde(default)]
    pub response_time_ms: Option<f64>,
    #[serde(default)]
    pub reachable: Option<bool>,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyNode {
    pub id: String,
    pub ip: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub os_guess: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    pub role: DeviceRole,
    /// Classification confidence in [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub is_central: bool,
    #[serde(default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub metrics: NodeMetrics,
    /// Why the node was classified or elected as it was.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyStats {
    pub total_nodes: usize,
    pub total_links: usize,
    /// Mean of link confidence scores, in [0, 1].
    pub mean_link_confidence: f64,
    pub protocol_links: usize,
    pub fallback_links: usize,
    pub assumed_links: usize,
    pub reachable_nodes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub id: String,
    pub version: u32,
    pub nodes: Vec<TopologyNode>,
    pub links: Vec<TopologyLink>,
    pub stats: TopologyStats,
    #[serde(default)]
    pub central_node_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub source: String,
}

impl Topology {
    pub fn node(&self, id: &str) -> Option<&TopologyNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn central_node(&self) -> Option<&TopologyNode> {
        self.central_node_id.as_deref().and_then(|id| self.node(id))
    }

    pub fn links_of_type(&self, link_type: LinkType) -> impl Iterator<Item = &TopologyLink> {
        self.links.iter().filter(move |l| l.link_type == link_type)
    }
}
