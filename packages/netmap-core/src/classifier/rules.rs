//! Declarative signal rules for device classification.
//!
//! Every heuristic the classifier knows is a row in one of these tables. Fusion
//! sums `weight`s per role; the hierarchical fallback uses `confidence` of the
//! first matching row in table order, so rows are ranked strongest first.

use crate::device::DeviceRole;
use regex::Regex;
use std::sync::LazyLock;

/// A regex over a free-text signal (hostname or OS string).
#[derive(Debug, Clone, Copy)]
pub struct PatternRule {
    pub pattern: &'static str,
    pub role: DeviceRole,
    pub weight: f64,
    pub confidence: f64,
}

/// A port combination. Scored by the share of `ports` found open.
#[derive(Debug, Clone, Copy)]
pub struct PortRule {
    pub ports: &'static [u16],
    pub role: DeviceRole,
    pub weight: f64,
}

/// A band of observed IP TTL values.
#[derive(Debug, Clone, Copy)]
pub struct TtlRule {
    pub min: u8,
    pub max: u8,
    pub role: DeviceRole,
    pub weight: f64,
    pub confidence: f64,
}

impl TtlRule {
    pub fn matches(&self, ttl: u8) -> bool {
        (self.min..=self.max).contains(&ttl)
    }
}

/// Condition set that, when all present conditions hold, adds `boost` to `role`.
#[derive(Debug, Clone, Copy)]
pub struct OverrideRule {
    pub name: &'static str,
    pub hostname: Option<&'static str>,
    pub os: Option<&'static str>,
    pub any_port: &'static [u16],
    pub min_ttl: Option<u8>,
    pub role: DeviceRole,
    pub boost: f64,
}

/// Vendor matches contribute `confidence * VENDOR_WEIGHT` to fusion.
pub const VENDOR_WEIGHT: f64 = 5.0;

pub const HOSTNAME_RULES: &[PatternRule] = &[
    PatternRule {
        pattern: r"(?i)(iphone|ipad|android|galaxy-?s\d|pixel-?\d|-phone\b|^phone-)",
        role: DeviceRole::Mobile,
        weight: 6.0,
        confidence: 0.85,
    },
    PatternRule {
        pattern: r"(?i)(firewall|fortigate|pfsense|opnsense|(^|[-_.])fw\d*([-_.]|$))",
        role: DeviceRole::Firewall,
        weight: 5.0,
        confidence: 0.8,
    },
    PatternRule {
        pattern: r"(?i)(router|gateway|(^|[-_.])(gw|rtr|edge|cpe)\d*([-_.]|$))",
        role: DeviceRole::Router,
        weight: 5.0,
        confidence: 0.8,
    },
    PatternRule {
        pattern: r"(?i)(switch|catalyst|procurve|(^|[-_.])(sw|core-?sw|access-?sw|tor)\d*([-_.]|$))",
        role: DeviceRole::Switch,
        weight: 5.0,
        confidence: 0.8,
    },
    PatternRule {
        pattern: r"(?i)(access-?point|unifi-?ap|(^|[-_.])(ap|wap)\d*([-_.]|$))",
        role: DeviceRole::AccessPoint,
        weight: 5.0,
        confidence: 0.75,
    },
    PatternRule {
        pattern: r"(?i)(printer|laserjet|officejet|deskjet|(^|[-_.])(prn|print)\d*([-_.]|$))",
        role: DeviceRole::Printer,
        weight: 5.0,
        confidence: 0.8,
    },
    PatternRule {
        pattern: r"(?i)(camera|ipcam|(^|[-_.])(cam|nvr|dvr)\d*([-_.]|$))",
        role: DeviceRole::Camera,
        weight: 5.0,
        confidence: 0.75,
    },
    PatternRule {
        pattern: r"(?i)(synology|diskstation|qnap|truenas|(^|[-_.])nas\d*([-_.]|$))",
        role: DeviceRole::Nas,
        weight: 5.0,
        confidence: 0.75,
    },
    PatternRule {
        pattern: r"(?i)(server|esxi|proxmox|(^|[-_.])(srv|pve|db|web|mail|dc|k8s|node)\d*([-_.]|$))",
        role: DeviceRole::Server,
        weight: 4.0,
        confidence: 0.7,
    },
    PatternRule {
        pattern: r"(?i)(sonoff|shelly|tasmota|esp(8266|32)?-|chromecast|roku|echo-|alexa|hue-bridge|nest-)",
        role: DeviceRole::Iot,
        weight: 4.0,
        confidence: 0.7,
    },
    PatternRule {
        pattern: r"(?i)(desktop|laptop|macbook|imac|thinkpad|workstation|(^|[-_.])(pc|ws)\d*([-_.]|$))",
        role: DeviceRole::Workstation,
        weight: 4.0,
        confidence: 0.65,
    },
];

pub const OS_RULES: &[PatternRule] = &[
    PatternRule {
        pattern: r"(?i)(iphone|ipados|apple ios|^ios \d|android)",
        role: DeviceRole::Mobile,
        weight: 5.0,
        confidence: 0.8,
    },
    PatternRule {
        pattern: r"(?i)(pan-os|fortios|pfsense|opnsense|sonicos)",
        role: DeviceRole::Firewall,
        weight: 5.0,
        confidence: 0.8,
    },
    PatternRule {
        pattern: r"(?i)(routeros|junos|edgeos|openwrt|dd-wrt|vyos|cisco ios|ios[- ]xe)",
        role: DeviceRole::Router,
        weight: 5.0,
        confidence: 0.75,
    },
    PatternRule {
        pattern: r"(?i)(nx-os|aos-cx|procurve|catalyst|swos|cumulus|switch)",
        role: DeviceRole::Switch,
        weight: 5.0,
        confidence: 0.75,
    },
    PatternRule {
        pattern: r"(?i)(jetdirect|printer|cups)",
        role: DeviceRole::Printer,
        weight: 5.0,
        confidence: 0.75,
    },
    PatternRule {
        pattern: r"(?i)(dsm|qts|truenas|freenas|unraid)",
        role: DeviceRole::Nas,
        weight: 4.0,
        confidence: 0.7,
    },
    PatternRule {
        pattern: r"(?i)(windows server|esxi|proxmox|ubuntu server|red hat|rhel|centos|rocky|alma|debian|freebsd)",
        role: DeviceRole::Server,
        weight: 4.0,
        confidence: 0.6,
    },
    PatternRule {
        pattern: r"(?i)(windows|mac ?os|os x|darwin|chrome ?os)",
        role: DeviceRole::Workstation,
        weight: 3.0,
        confidence: 0.55,
    },
    PatternRule {
        pattern: r"(?i)(embedded|rtos|lwip|esp-idf|contiki|zephyr)",
        role: DeviceRole::Iot,
        weight: 3.0,
        confidence: 0.5,
    },
    PatternRule {
        pattern: r"(?i)linux",
        role: DeviceRole::Server,
        weight: 1.5,
        confidence: 0.45,
    },
];

pub const PORT_RULES: &[PortRule] = &[
    PortRule {
        ports: &[515, 631, 9100],
        role: DeviceRole::Printer,
        weight: 6.0,
    },
    PortRule {
        ports: &[62078],
        role: DeviceRole::Mobile,
        weight: 5.0,
    },
    PortRule {
        ports: &[53, 67, 179, 1900],
        role: DeviceRole::Router,
        weight: 5.0,
    },
    PortRule {
        ports: &[554, 8000, 37777],
        role: DeviceRole::Camera,
        weight: 5.0,
    },
    PortRule {
        ports: &[1883, 8883, 5683],
        role: DeviceRole::Iot,
        weight: 5.0,
    },
    PortRule {
        ports: &[139, 445, 548, 2049, 5000, 5001],
        role: DeviceRole::Nas,
        weight: 5.0,
    },
    PortRule {
        ports: &[500, 4500, 1194, 10443],
        role: DeviceRole::Firewall,
        weight: 4.0,
    },
    PortRule {
        ports: &[8080, 8443, 10001],
        role: DeviceRole::AccessPoint,
        weight: 4.0,
    },
    PortRule {
        ports: &[23, 161, 162],
        role: DeviceRole::Switch,
        weight: 4.0,
    },
    PortRule {
        ports: &[135, 139, 445, 3389, 5900],
        role: DeviceRole::Workstation,
        weight: 4.0,
    },
    PortRule {
        ports: &[22, 25, 80, 443, 3306, 5432, 6379, 27017],
        role: DeviceRole::Server,
        weight: 4.0,
    },
];

pub const TTL_RULES: &[TtlRule] = &[
    TtlRule {
        min: 129,
        max: 255,
        role: DeviceRole::Router,
        weight: 2.0,
        confidence: 0.4,
    },
    TtlRule {
        min: 129,
        max: 255,
        role: DeviceRole::Switch,
        weight: 1.5,
        confidence: 0.35,
    },
    TtlRule {
        min: 65,
        max: 128,
        role: DeviceRole::Workstation,
        weight: 2.0,
        confidence: 0.35,
    },
    TtlRule {
        min: 1,
        max: 64,
        role: DeviceRole::Workstation,
        weight: 1.0,
        confidence: 0.3,
    },
    TtlRule {
        min: 1,
        max: 64,
        role: DeviceRole::Server,
        weight: 1.0,
        confidence: 0.3,
    },
];

pub const OVERRIDE_RULES: &[OverrideRule] = &[
    OverrideRule {
        name: "apple handset hostname",
        hostname: Some(r"(?i)(iphone|ipad)"),
        os: None,
        any_port: &[],
        min_ttl: None,
        role: DeviceRole::Mobile,
        boost: 4.0,
    },
    OverrideRule {
        name: "mobile hostname with mobile os",
        hostname: Some(r"(?i)(iphone|ipad|android|galaxy|pixel|phone)"),
        os: Some(r"(?i)(ios|ipados|android)"),
        any_port: &[],
        min_ttl: None,
        role: DeviceRole::Mobile,
        boost: 4.0,
    },
    OverrideRule {
        name: "router hostname with network os",
        hostname: Some(r"(?i)(router|gateway|gw|rtr)"),
        os: Some(r"(?i)(routeros|junos|edgeos|openwrt|ios)"),
        any_port: &[],
        min_ttl: None,
        role: DeviceRole::Router,
        boost: 4.0,
    },
    OverrideRule {
        name: "switch hostname with network ttl",
        hostname: Some(r"(?i)(switch|(^|[-_.])sw\d*)"),
        os: None,
        any_port: &[],
        min_ttl: Some(200),
        role: DeviceRole::Switch,
        boost: 3.0,
    },
    OverrideRule {
        name: "printer hostname with raw print port",
        hostname: Some(r"(?i)(printer|laserjet|prn|print)"),
        os: None,
        any_port: &[9100, 631],
        min_ttl: None,
        role: DeviceRole::Printer,
        boost: 4.0,
    },
];

/// A `PatternRule` with its regex compiled.
#[derive(Debug)]
pub struct CompiledPattern {
    pub rule: PatternRule,
    pub regex: Regex,
}

#[derive(Debug)]
pub struct CompiledOverride {
    pub rule: OverrideRule,
    pub hostname: Option<Regex>,
    pub os: Option<Regex>,
}

fn compile_patterns(rules: &[PatternRule]) -> Vec<CompiledPattern> {
    rules
        .iter()
        .map(|rule| CompiledPattern {
            rule: *rule,
            regex: Regex::new(rule.pattern).expect("built-in classifier pattern must compile"),
        })
        .collect()
}

pub static HOSTNAME_PATTERNS: LazyLock<Vec<CompiledPattern>> =
    LazyLock::new(|| compile_patterns(HOSTNAME_RULES));

pub static OS_PATTERNS: LazyLock<Vec<CompiledPattern>> =
    LazyLock::new(|| compile_patterns(OS_RULES));

pub static OVERRIDES: LazyLock<Vec<CompiledOverride>> = LazyLock::new(|| {
    OVERRIDE_RULES
        .iter()
        .map(|rule| CompiledOverride {
            rule: *rule,
            hostname: rule
                .hostname
                .map(|p| Regex::new(p).expect("built-in override pattern must compile")),
            os: rule
                .os
                .map(|p| Regex::new(p).expect("built-in override pattern must compile")),
        })
        .collect()
});

/// Share of `rule.ports` present in `open`, in [0, 1].
pub fn port_overlap(rule: &PortRule, open: &[u16]) -> f64 {
    if rule.ports.is_empty() {
        return 0.0;
    }
    let hits = rule.ports.iter().filter(|p| open.contains(p)).count();
    hits as f64 / rule.ports.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(HOSTNAME_PATTERNS.len(), HOSTNAME_RULES.len());
        assert_eq!(OS_PATTERNS.len(), OS_RULES.len());
        assert_eq!(OVERRIDES.len(), OVERRIDE_RULES.len());
    }

    #[test]
    fn test_hostname_families_cover_sample_names() {
        let samples = [
            ("iphone-of-alice", DeviceRole::Mobile),
            ("fw01", DeviceRole::Firewall),
            ("core-router-1", DeviceRole::Router),
            ("sw-3", DeviceRole::Switch),
            ("ap2.office", DeviceRole::AccessPoint),
            ("hp-laserjet-4", DeviceRole::Printer),
            ("garage-cam1", DeviceRole::Camera),
            ("diskstation", DeviceRole::Nas),
            ("srv-db01", DeviceRole::Server),
            ("shelly-plug-kitchen", DeviceRole::Iot),
            ("bobs-macbook-pro", DeviceRole::Workstation),
        ];

        for (hostname, expected) in samples {
            let first = HOSTNAME_PATTERNS
                .iter()
                .find(|p| p.regex.is_match(hostname))
                .map(|p| p.rule.role);
            assert_eq!(first, Some(expected), "hostname {hostname}");
        }
    }

    #[test]
    fn test_every_role_but_unknown_has_a_hostname_family() {
        for role in DeviceRole::ALL {
            let covered = HOSTNAME_RULES.iter().any(|r| r.role == role);
            assert_eq!(covered, role != DeviceRole::Unknown, "role {role}");
        }
    }

    #[test]
    fn test_rule_values_are_sane() {
        for rule in HOSTNAME_RULES.iter().chain(OS_RULES) {
            assert!(rule.weight > 0.0);
            assert!((0.0..=1.0).contains(&rule.confidence), "{}", rule.pattern);
        }
        for rule in TTL_RULES {
            assert!(rule.min <= rule.max);
        }
        for rule in PORT_RULES {
            assert!(!rule.ports.is_empty());
        }
    }

    #[test]
    fn test_port_overlap() {
        let printer = &PORT_RULES[0];
        assert_eq!(port_overlap(printer, &[9100]), 1.0 / 3.0);
        assert_eq!(port_overlap(printer, &[515, 631, 9100, 80]), 1.0);
        assert_eq!(port_overlap(printer, &[22]), 0.0);
    }
}
