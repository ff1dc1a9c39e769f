//! MAC OUI (Organizationally Unique Identifier) vendor lookup
//!
//! Maps the 3-octet prefix of a hardware address to a vendor and a device role.
//! Resolution order:
//! 1. A small table of known prefixes with fixed roles (confidence 0.9)
//! 2. The vendor-name table, mapped through keyword rules (confidence 0.7)
//! 3. Unknown (confidence 0.1)

use crate::device::DeviceRole;
use std::collections::HashMap;

pub const KNOWN_PREFIX_CONFIDENCE: f64 = 0.9;
pub const VENDOR_KEYWORD_CONFIDENCE: f64 = 0.7;
pub const UNKNOWN_VENDOR_CONFIDENCE: f64 = 0.1;

/// Read-only vendor-name source keyed by normalized prefix (`AA:BB:CC`).
pub trait VendorTable: Send + Sync {
    fn lookup(&self, prefix: &str) -> Option<String>;
}

/// Vendor table backed by the IEEE OUI registry (MA-L, MA-M, MA-S, CID, IAB).
#[derive(Debug, Default, Clone, Copy)]
pub struct OuiDatabase;

impl VendorTable for OuiDatabase {
    fn lookup(&self, prefix: &str) -> Option<String> {
        let mac = format!("{}:00:00:00", prefix);
        match oui_data::lookup(&mac) {
            Some(record) => {
                let vendor_name = record.organization().to_string();
                tracing::trace!(
                    "OUI lookup for {}: found {} (registry: {:?})",
                    prefix,
                    vendor_name,
                    record.registry()
                );
                Some(vendor_name)
            }
            None => None,
        }
    }
}

/// In-memory vendor table, loaded once and read-only thereafter.
#[derive(Debug, Default, Clone)]
pub struct StaticVendorTable {
    entries: HashMap<String, String>,
}

impl StaticVendorTable {
    pub fn new<I, P, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, V)>,
        P: AsRef<str>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .filter_map(|(prefix, vendor)| {
                normalize_prefix(prefix.as_ref()).map(|p| (p, vendor.into()))
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl VendorTable for StaticVendorTable {
    fn lookup(&self, prefix: &str) -> Option<String> {
        self.entries.get(prefix).cloned()
    }
}

/// Where a vendor match came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorSource {
    KnownPrefix,
    VendorKeyword,
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VendorMatch {
    pub prefix: Option<String>,
    pub vendor: Option<String>,
    pub role: DeviceRole,
    pub confidence: f64,
    pub source: VendorSource,
}

impl VendorMatch {
    fn unknown(prefix: Option<String>, vendor: Option<String>) -> Self {
        Self {
            prefix,
            vendor,
            role: DeviceRole::Unknown,
            confidence: UNKNOWN_VENDOR_CONFIDENCE,
            source: VendorSource::Unknown,
        }
    }
}

/// Prefixes whose role is fixed regardless of vendor name.
pub const KNOWN_PREFIXES: &[(&str, DeviceRole, &str)] = &[
    // Hypervisors and container runtimes
    ("02:42:AC", DeviceRole::Server, "Docker"),
    ("00:50:56", DeviceRole::Server, "VMware"),
    ("00:0C:29", DeviceRole::Server, "VMware"),
    ("00:05:69", DeviceRole::Server, "VMware"),
    ("00:16:3E", DeviceRole::Server, "Xen"),
    ("00:15:5D", DeviceRole::Server, "Microsoft Hyper-V"),
    ("00:1C:42", DeviceRole::Server, "Parallels"),
    ("52:54:00", DeviceRole::Server, "QEMU/KVM"),
    ("08:00:27", DeviceRole::Server, "VirtualBox"),
    ("BC:24:11", DeviceRole::Server, "Proxmox VE"),
    // Network gear sold almost exclusively in one form factor
    ("00:18:0A", DeviceRole::AccessPoint, "Cisco Meraki"),
    ("88:15:44", DeviceRole::AccessPoint, "Cisco Meraki"),
    ("FC:EC:DA", DeviceRole::AccessPoint, "Ubiquiti"),
    ("24:A4:3C", DeviceRole::AccessPoint, "Ubiquiti"),
    ("4C:5E:0C", DeviceRole::Router, "MikroTik"),
    ("E4:8D:8C", DeviceRole::Router, "MikroTik"),
    ("00:09:0F", DeviceRole::Firewall, "Fortinet"),
    ("00:1B:17", DeviceRole::Firewall, "Palo Alto Networks"),
    // Single-board computers and IoT modules
    ("B8:27:EB", DeviceRole::Iot, "Raspberry Pi Foundation"),
    ("DC:A6:32", DeviceRole::Iot, "Raspberry Pi Trading"),
    ("24:0A:C4", DeviceRole::Iot, "Espressif"),
    // Phones
    ("00:1B:63", DeviceRole::Mobile, "Apple iPhone"),
    ("00:26:08", DeviceRole::Mobile, "Apple iPhone"),
    // Printers
    ("00:80:77", DeviceRole::Printer, "Brother"),
    ("00:00:48", DeviceRole::Printer, "Seiko Epson"),
];

/// Vendor-name keywords mapped to a role. Evaluated top to bottom; first hit wins.
pub const VENDOR_KEYWORDS: &[(&[&str], DeviceRole)] = &[
    (
        &[
            "firewalla", "pfsense", "opnsense", "sophos", "watchguard", "sonicwall", "barracuda",
            "checkpoint", "forcepoint", "untangle", "fortinet", "palo alto",
        ],
        DeviceRole::Firewall,
    ),
    (
        &["ruckus", "meraki", "cambium", "aerohive", "aruba"],
        DeviceRole::AccessPoint,
    ),
    (&["arista", "extreme networks", "brocade"], DeviceRole::Switch),
    (
        &[
            "cisco", "juniper", "ubiquiti", "netgear", "tp-link", "linksys", "d-link", "mikrotik",
            "routerboard", "zyxel", "draytek", "technicolor", "sagemcom", "avm",
        ],
        DeviceRole::Router,
    ),
    (
        &[
            "proxmox", "vmware", "xensource", "parallels", "virtualbox", "qemu", "supermicro",
            "dell emc", "hewlett packard enterprise", "inspur", "fujitsu",
        ],
        DeviceRole::Server,
    ),
    (
        &[
            "synology", "qnap", "western digital", "buffalo", "drobo", "asustor", "terramaster",
        ],
        DeviceRole::Nas,
    ),
    (
        &["hikvision", "dahua", "axis communications", "reolink", "amcrest"],
        DeviceRole::Camera,
    ),
    (
        &[
            "canon", "epson", "brother", "xerox", "lexmark", "ricoh", "konica", "kyocera",
            "hp inc",
        ],
        DeviceRole::Printer,
    ),
    (
        &[
            "sonos", "philips", "signify", "ecobee", "wyze", "tuya", "shelly", "espressif",
            "roku", "wemo", "lifx", "nanoleaf", "nest labs", "raspberry",
        ],
        DeviceRole::Iot,
    ),
    (
        &[
            "samsung", "huawei", "xiaomi", "oneplus", "oppo", "vivo", "motorola", "realme",
            "honor",
        ],
        DeviceRole::Mobile,
    ),
    (
        &[
            "apple", "dell", "lenovo", "acer", "asustek", "intel", "realtek", "gigabyte",
            "micro-star", "toshiba", "hewlett packard",
        ],
        DeviceRole::Workstation,
    ),
];

/// Normalize any common MAC notation to `AA:BB:CC:DD:EE:FF`.
///
/// Accepts colon, dash and dot separated forms as well as bare hex. Returns
/// `None` unless exactly 12 hex digits remain.
pub fn normalize_mac(mac: &str) -> Option<String> {
    let cleaned: String = mac.trim().replace([':', '-', '.'], "").to_uppercase();

    if cleaned.len() != 12 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    Some(format!(
        "{}:{}:{}:{}:{}:{}",
        &cleaned[0..2],
        &cleaned[2..4],
        &cleaned[4..6],
        &cleaned[6..8],
        &cleaned[8..10],
        &cleaned[10..12]
    ))
}

/// Normalize a full MAC or a bare prefix to its 3-octet form `AA:BB:CC`.
pub fn normalize_prefix(mac: &str) -> Option<String> {
    let cleaned: String = mac.trim().replace([':', '-', '.'], "").to_uppercase();

    if cleaned.len() < 6 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    Some(format!(
        "{}:{}:{}",
        &cleaned[0..2],
        &cleaned[2..4],
        &cleaned[4..6]
    ))
}

/// Map a vendor name to a role through the keyword rules.
pub fn role_from_vendor(vendor: &str) -> Option<DeviceRole> {
    let vendor_lower = vendor.to_lowercase();
    VENDOR_KEYWORDS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| vendor_lower.contains(k)))
        .map(|(_, role)| *role)
}

/// Prefix → vendor → role resolution with O(1) table lookups.
pub struct VendorLookup {
    known: HashMap<String, (DeviceRole, &'static str)>,
    table: Box<dyn VendorTable>,
}

impl VendorLookup {
    pub fn new(table: impl VendorTable + 'static) -> Self {
        let known = KNOWN_PREFIXES
            .iter()
            .map(|(prefix, role, vendor)| (prefix.to_string(), (*role, *vendor)))
            .collect();
        Self {
            known,
            table: Box::new(table),
        }
    }

    /// Lookup backed by the bundled IEEE registry.
    pub fn ieee() -> Self {
        Self::new(OuiDatabase)
    }

    pub fn vendor_name(&self, mac: &str) -> Option<String> {
        let prefix = normalize_prefix(mac)?;
        self.known
            .get(&prefix)
            .map(|(_, vendor)| vendor.to_string())
            .or_else(|| self.table.lookup(&prefix))
    }

    pub fn lookup(&self, mac: &str) -> VendorMatch {
        let Some(prefix) = normalize_prefix(mac) else {
            return VendorMatch::unknown(None, None);
        };

        if let Some((role, vendor)) = self.known.get(&prefix) {
            return VendorMatch {
                prefix: Some(prefix),
                vendor: Some(vendor.to_string()),
                role: *role,
                confidence: KNOWN_PREFIX_CONFIDENCE,
                source: VendorSource::KnownPrefix,
            };
        }

        match self.table.lookup(&prefix) {
            Some(vendor) => match role_from_vendor(&vendor) {
                Some(role) => VendorMatch {
                    prefix: Some(prefix),
                    vendor: Some(vendor),
                    role,
                    confidence: VENDOR_KEYWORD_CONFIDENCE,
                    source: VendorSource::VendorKeyword,
                },
                None => VendorMatch::unknown(Some(prefix), Some(vendor)),
            },
            None => VendorMatch::unknown(Some(prefix), None),
        }
    }
}

impl std::fmt::Debug for VendorLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorLookup")
            .field("known_prefixes", &self.known.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_with(entries: &[(&str, &str)]) -> VendorLookup {
        VendorLookup::new(StaticVendorTable::new(entries.iter().copied()))
    }

    #[test]
    fn test_normalize_mac_formats() {
        assert_eq!(
            normalize_mac("00-1a-2b-3c-4d-5e").as_deref(),
            Some("00:1A:2B:3C:4D:5E")
        );
        assert_eq!(
            normalize_mac("001a.2b3c.4d5e").as_deref(),
            Some("00:1A:2B:3C:4D:5E")
        );
        assert_eq!(normalize_mac("not-a-mac"), None);
        assert_eq!(normalize_mac("00:1a:2b"), None);
        assert_eq!(normalize_prefix("00:1a:2b:3c:4d:5e").as_deref(), Some("00:1A:2B"));
        assert_eq!(normalize_prefix("zz:zz:zz"), None);
    }

    #[test]
    fn test_known_prefix_wins() {
        let lookup = lookup_with(&[("00:50:56", "Some Other Name")]);
        let m = lookup.lookup("00:50:56:12:34:56");
        assert_eq!(m.role, DeviceRole::Server);
        assert_eq!(m.confidence, KNOWN_PREFIX_CONFIDENCE);
        assert_eq!(m.source, VendorSource::KnownPrefix);
    }

    #[test]
    fn test_vendor_keyword_mapping() {
        let lookup = lookup_with(&[
            ("00:17:F2", "Cisco Systems, Inc."),
            ("00:11:32", "Synology Incorporated"),
            ("AA:BB:CC", "Obscure Widgets Ltd"),
        ]);

        let cisco = lookup.lookup("00:17:f2:01:02:03");
        assert_eq!(cisco.role, DeviceRole::Router);
        assert_eq!(cisco.confidence, VENDOR_KEYWORD_CONFIDENCE);

        assert_eq!(lookup.lookup("00-11-32-aa-bb-cc").role, DeviceRole::Nas);

        let obscure = lookup.lookup("aa:bb:cc:00:00:01");
        assert_eq!(obscure.role, DeviceRole::Unknown);
        assert_eq!(obscure.vendor.as_deref(), Some("Obscure Widgets Ltd"));
        assert_eq!(obscure.confidence, UNKNOWN_VENDOR_CONFIDENCE);
    }

    #[test]
    fn test_malformed_address_is_unknown() {
        let lookup = lookup_with(&[]);
        let m = lookup.lookup("garbage");
        assert_eq!(m.role, DeviceRole::Unknown);
        assert_eq!(m.prefix, None);
    }

    #[test]
    fn test_role_from_vendor() {
        assert_eq!(role_from_vendor("Firewalla Inc."), Some(DeviceRole::Firewall));
        assert_eq!(role_from_vendor("Apple, Inc."), Some(DeviceRole::Workstation));
        assert_eq!(role_from_vendor("Hikvision Digital"), Some(DeviceRole::Camera));
        assert_eq!(role_from_vendor("Unknown Vendor"), None);
    }

    #[test]
    fn test_known_prefixes_are_normalized() {
        for (prefix, _, _) in KNOWN_PREFIXES {
            assert_eq!(normalize_prefix(prefix).as_deref(), Some(*prefix));
        }
    }
}
