//! Device role classification
//!
//! Two tiers:
//! 1. Contextual fusion: every signal scores every role through the rule tables
//!    in [`rules`], scores are summed per role and the best total wins with
//!    confidence `min(total / 10, 1)`. Override rules add fixed boosts on top.
//! 2. Hierarchical fallback: when fusion is not confident enough, signals are
//!    tried one at a time (hardware address, ports, hostname, OS, TTL) and the
//!    first one clearing its floor decides.

pub mod oui;
pub mod rules;

use crate::device::{Device, DeviceRole};
use oui::{VendorLookup, VendorSource};
use rules::{
    HOSTNAME_PATTERNS, OS_PATTERNS, OVERRIDES, PORT_RULES, TTL_RULES, VENDOR_WEIGHT,
    port_overlap,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Signal bundle fed to the classifier. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationInput {
    #[serde(default)]
    pub hardware_address: Option<String>,
    #[serde(default)]
    pub open_ports: Vec<u16>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub os_guess: Option<String>,
    #[serde(default)]
    pub ttl: Option<u8>,
}

impl ClassificationInput {
    pub fn from_device(device: &Device) -> Self {
        Self {
            hardware_address: device.mac.clone(),
            open_ports: device.open_ports.clone(),
            hostname: device.hostname.clone(),
            os_guess: device.os_guess.clone(),
            ttl: device.ttl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassificationMethod {
    HardwareAddress,
    Ports,
    Hostname,
    Os,
    Ttl,
    Fallback,
    Contextual,
}

impl ClassificationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationMethod::HardwareAddress => "hardware-address",
            ClassificationMethod::Ports => "ports",
            ClassificationMethod::Hostname => "hostname",
            ClassificationMethod::Os => "os",
            ClassificationMethod::Ttl => "ttl",
            ClassificationMethod::Fallback => "fallback",
            ClassificationMethod::Contextual => "contextual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub role: DeviceRole,
    pub confidence: f64,
    pub method: ClassificationMethod,
    pub evidence: Vec<String>,
}

impl ClassificationResult {
    fn unknown() -> Self {
        Self {
            role: DeviceRole::Unknown,
            confidence: oui::UNKNOWN_VENDOR_CONFIDENCE,
            method: ClassificationMethod::Fallback,
            evidence: vec!["no signal cleared its confidence floor".to_string()],
        }
    }
}

/// Fusion threshold and per-signal floors for the fallback tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierThresholds {
    pub fusion: f64,
    pub hardware_address: f64,
    pub ports: f64,
    pub hostname: f64,
    pub os: f64,
    pub ttl: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            fusion: 0.8,
            hardware_address: 0.7,
            ports: 0.6,
            hostname: 0.5,
            os: 0.4,
            ttl: 0.3,
        }
    }
}

/// Per-role additive scores with the evidence that produced them.
#[derive(Debug, Default)]
struct Scoreboard {
    totals: BTreeMap<DeviceRole, f64>,
    evidence: BTreeMap<DeviceRole, Vec<String>>,
}

impl Scoreboard {
    fn add(&mut self, role: DeviceRole, points: f64, why: String) {
        if role == DeviceRole::Unknown || points <= 0.0 {
            return;
        }
        *self.totals.entry(role).or_insert(0.0) += points;
        self.evidence.entry(role).or_default().push(why);
    }

    /// Highest total; ties resolve to the role declared first in `DeviceRole`.
    fn best(mut self) -> Option<(DeviceRole, f64, Vec<String>)> {
        let mut best: Option<(DeviceRole, f64)> = None;
        for (role, total) in &self.totals {
            match best {
                Some((_, current)) if *total <= current => {}
                _ => best = Some((*role, *total)),
            }
        }
        let (role, total) = best?;
        let evidence = self.evidence.remove(&role).unwrap_or_default();
        Some((role, total, evidence))
    }
}

/// Pure classifier over a read-only vendor table.
#[derive(Debug, Clone)]
pub struct DeviceClassifier {
    vendors: Arc<VendorLookup>,
    thresholds: ClassifierThresholds,
}

impl DeviceClassifier {
    pub fn new(vendors: Arc<VendorLookup>) -> Self {
        Self::with_thresholds(vendors, ClassifierThresholds::default())
    }

    pub fn with_thresholds(vendors: Arc<VendorLookup>, thresholds: ClassifierThresholds) -> Self {
        Self {
            vendors,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &ClassifierThresholds {
        &self.thresholds
    }

    pub fn vendors(&self) -> &VendorLookup {
        &self.vendors
    }

    pub fn classify(&self, input: &ClassificationInput) -> ClassificationResult {
        if let Some(fused) = self.fuse(input) {
            if fused.confidence >= self.thresholds.fusion {
                return fused;
            }
        }

        self.fallback(input)
            .unwrap_or_else(ClassificationResult::unknown)
    }

    pub fn classify_device(&self, device: &Device) -> ClassificationResult {
        self.classify(&ClassificationInput::from_device(device))
    }

    /// Contextual fusion. `None` when no signal scored any role.
    fn fuse(&self, input: &ClassificationInput) -> Option<ClassificationResult> {
        let mut board = Scoreboard::default();
        let hostname = input.hostname.as_deref().map(str::trim).filter(|h| !h.is_empty());
        let os = input.os_guess.as_deref().map(str::trim).filter(|o| !o.is_empty());

        if let Some(mac) = input.hardware_address.as_deref() {
            let vendor = self.vendors.lookup(mac);
            if vendor.source != VendorSource::Unknown {
                board.add(
                    vendor.role,
                    vendor.confidence * VENDOR_WEIGHT,
                    format!(
                        "vendor {} ({})",
                        vendor.vendor.as_deref().unwrap_or("?"),
                        vendor.prefix.as_deref().unwrap_or("?")
                    ),
                );
            }
        }

        if let Some(hostname) = hostname {
            for pattern in HOSTNAME_PATTERNS.iter() {
                if pattern.regex.is_match(hostname) {
                    board.add(
                        pattern.rule.role,
                        pattern.rule.weight,
                        format!("hostname '{}' matches {}", hostname, pattern.rule.role),
                    );
                }
            }
        }

        if let Some(os) = os {
            for pattern in OS_PATTERNS.iter() {
                if pattern.regex.is_match(os) {
                    board.add(
                        pattern.rule.role,
                        pattern.rule.weight,
                        format!("os '{}' matches {}", os, pattern.rule.role),
                    );
                }
            }
        }

        if !input.open_ports.is_empty() {
            for rule in PORT_RULES {
                let overlap = port_overlap(rule, &input.open_ports);
                if overlap > 0.0 {
                    board.add(
                        rule.role,
                        rule.weight * overlap,
                        format!("ports {:?} overlap {:.0}%", rule.ports, overlap * 100.0),
                    );
                }
            }
        }

        if let Some(ttl) = input.ttl {
            for rule in TTL_RULES.iter().filter(|r| r.matches(ttl)) {
                board.add(rule.role, rule.weight, format!("ttl {} in {}-{}", ttl, rule.min, rule.max));
            }
        }

        for over in OVERRIDES.iter() {
            let hostname_ok = match (&over.hostname, hostname) {
                (None, _) => true,
                (Some(re), Some(h)) => re.is_match(h),
                (Some(_), None) => false,
            };
            let os_ok = match (&over.os, os) {
                (None, _) => true,
                (Some(re), Some(o)) => re.is_match(o),
                (Some(_), None) => false,
            };
            let ports_ok = over.rule.any_port.is_empty()
                || over.rule.any_port.iter().any(|p| input.open_ports.contains(p));
            let ttl_ok = match (over.rule.min_ttl, input.ttl) {
                (None, _) => true,
                (Some(min), Some(ttl)) => ttl >= min,
                (Some(_), None) => false,
            };

            if hostname_ok && os_ok && ports_ok && ttl_ok {
                board.add(over.rule.role, over.rule.boost, format!("override: {}", over.rule.name));
            }
        }

        let (role, total, evidence) = board.best()?;
        Some(ClassificationResult {
            role,
            confidence: (total / 10.0).min(1.0),
            method: ClassificationMethod::Contextual,
            evidence,
        })
    }

    /// Hierarchical fallback. First signal to clear its floor wins.
    fn fallback(&self, input: &ClassificationInput) -> Option<ClassificationResult> {
        let t = &self.thresholds;

        if let Some(mac) = input.hardware_address.as_deref() {
            let vendor = self.vendors.lookup(mac);
            if vendor.role != DeviceRole::Unknown && vendor.confidence >= t.hardware_address {
                return Some(ClassificationResult {
                    role: vendor.role,
                    confidence: vendor.confidence,
                    method: ClassificationMethod::HardwareAddress,
                    evidence: vec![format!(
                        "vendor {} ({})",
                        vendor.vendor.as_deref().unwrap_or("?"),
                        vendor.prefix.as_deref().unwrap_or("?")
                    )],
                });
            }
        }

        if !input.open_ports.is_empty() {
            let mut best: Option<(DeviceRole, f64, &'static [u16])> = None;
            for rule in PORT_RULES {
                let overlap = port_overlap(rule, &input.open_ports);
                if overlap <= 0.0 {
                    continue;
                }
                let confidence = (0.3 + 0.6 * overlap).min(0.9);
                match best {
                    Some((_, current, _)) if confidence <= current => {}
                    _ => best = Some((rule.role, confidence, rule.ports)),
                }
            }
            if let Some((role, confidence, ports)) = best {
                if confidence >= t.ports {
                    return Some(ClassificationResult {
                        role,
                        confidence,
                        method: ClassificationMethod::Ports,
                        evidence: vec![format!("port combination {:?}", ports)],
                    });
                }
            }
        }

        let hostname = input.hostname.as_deref().map(str::trim).filter(|h| !h.is_empty());
        if let Some(hostname) = hostname {
            if let Some(pattern) = HOSTNAME_PATTERNS.iter().find(|p| p.regex.is_match(hostname)) {
                if pattern.rule.confidence >= t.hostname {
                    return Some(ClassificationResult {
                        role: pattern.rule.role,
                        confidence: pattern.rule.confidence,
                        method: ClassificationMethod::Hostname,
                        evidence: vec![format!("hostname '{}'", hostname)],
                    });
                }
            }
        }

        let os = input.os_guess.as_deref().map(str::trim).filter(|o| !o.is_empty());
        if let Some(os) = os {
            if let Some(pattern) = OS_PATTERNS.iter().find(|p| p.regex.is_match(os)) {
                if pattern.rule.confidence >= t.os {
                    return Some(ClassificationResult {
                        role: pattern.rule.role,
                        confidence: pattern.rule.confidence,
                        method: ClassificationMethod::Os,
                        evidence: vec![format!("os '{}'", os)],
                    });
                }
            }
        }

        if let Some(ttl) = input.ttl {
            if let Some(rule) = TTL_RULES.iter().find(|r| r.matches(ttl)) {
                if rule.confidence >= t.ttl {
                    return Some(ClassificationResult {
                        role: rule.role,
                        confidence: rule.confidence,
                        method: ClassificationMethod::Ttl,
                        evidence: vec![format!("ttl {}", ttl)],
                    });
                }
            }
        }

        None
    }
}
