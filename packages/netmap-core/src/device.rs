//! Device snapshot model supplied by the inventory collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::Ipv4Addr;

/// Role a device plays on the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    Router,
    Switch,
    AccessPoint,
    Firewall,
    Server,
    Nas,
    Workstation,
    Mobile,
    Printer,
    Camera,
    Iot,
    #[serde(other)]
    Unknown,
}

impl DeviceRole {
    pub const ALL: [DeviceRole; 12] = [
        DeviceRole::Router,
        DeviceRole::Switch,
        DeviceRole::AccessPoint,
        DeviceRole::Firewall,
        DeviceRole::Server,
        DeviceRole::Nas,
        DeviceRole::Workstation,
        DeviceRole::Mobile,
        DeviceRole::Printer,
        DeviceRole::Camera,
        DeviceRole::Iot,
        DeviceRole::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Router => "router",
            DeviceRole::Switch => "switch",
            DeviceRole::AccessPoint => "access_point",
            DeviceRole::Firewall => "firewall",
            DeviceRole::Server => "server",
            DeviceRole::Nas => "nas",
            DeviceRole::Workstation => "workstation",
            DeviceRole::Mobile => "mobile",
            DeviceRole::Printer => "printer",
            DeviceRole::Camera => "camera",
            DeviceRole::Iot => "iot",
            DeviceRole::Unknown => "unknown",
        }
    }

    /// Devices whose forwarding tables are worth polling.
    pub fn is_switch_class(&self) -> bool {
        matches!(self, DeviceRole::Switch)
    }

    /// Network plumbing: probed first, with the most patient deadline.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            DeviceRole::Router | DeviceRole::Switch | DeviceRole::AccessPoint | DeviceRole::Firewall
        )
    }

    pub fn is_server_class(&self) -> bool {
        matches!(self, DeviceRole::Server | DeviceRole::Nas)
    }

    /// Roles eligible for central-node election.
    pub fn is_central_candidate(&self) -> bool {
        matches!(
            self,
            DeviceRole::Router | DeviceRole::Switch | DeviceRole::Server
        )
    }
}

impl std::fmt::Display for DeviceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Operational stats observed for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    #[serde(default)]
    pub load: f64,
    #[serde(default)]
    pub bandwidth_mbps: f64,
    #[serde(default = "epoch")]
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub response_time_ms: Option<f64>,
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

impl Default for DeviceStats {
    fn default() -> Self {
        Self {
            load: 0.0,
            bandwidth_mbps: 0.0,
            last_seen: epoch(),
            response_time_ms: None,
        }
    }
}

impl DeviceStats {
    pub fn seen_at(last_seen: DateTime<Utc>) -> Self {
        Self {
            last_seen,
            ..Self::default()
        }
    }
}

/// Upstream inventories are loose about the stats block; anything that does not
/// parse as `DeviceStats` becomes the default rather than failing the snapshot.
fn stats_or_default<'de, D>(deserializer: D) -> Result<DeviceStats, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default())
}

/// A device as observed by the inventory. Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub ip: String,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub os_guess: Option<String>,
    #[serde(default = "unknown_role")]
    pub role: DeviceRole,
    #[serde(default)]
    pub vendor: Option<String>,
    /// Open ports reported by the raw scanner, if it ran.
    #[serde(default)]
    pub open_ports: Vec<u16>,
    /// Observed IP TTL from the raw scanner, if it ran.
    #[serde(default)]
    pub ttl: Option<u8>,
    #[serde(default, deserialize_with = "stats_or_default")]
    pub stats: DeviceStats,
}

fn unknown_role() -> DeviceRole {
    DeviceRole::Unknown
}

impl Device {
    pub fn new(id: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ip: ip.into(),
            mac: None,
            hostname: None,
            os_guess: None,
            role: DeviceRole::Unknown,
            vendor: None,
            open_ports: Vec::new(),
            ttl: None,
            stats: DeviceStats::default(),
        }
    }

    pub fn with_role(mut self, role: DeviceRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = Some(mac.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_last_seen(mut self, last_seen: DateTime<Utc>) -> Self {
        self.stats.last_seen = last_seen;
        self
    }

    pub fn ipv4(&self) -> Option<Ipv4Addr> {
        self.ip.parse().ok()
    }
}

/// The /24-equivalent network an address belongs to.
pub fn subnet_of(ip: &str) -> Option<ipnetwork::Ipv4Network> {
    let addr: Ipv4Addr = ip.parse().ok()?;
    let network = ipnetwork::Ipv4Network::new(addr, 24).ok()?;
    ipnetwork::Ipv4Network::new(network.network(), 24).ok()
}

pub fn same_subnet(a: &str, b: &str) -> bool {
    match (subnet_of(a), subnet_of(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// `a.b.c.1` for the subnet containing `ip`.
pub fn gateway_guess(ip: &str) -> Option<String> {
    let network = subnet_of(ip)?;
    let octets = network.network().octets();
    Some(Ipv4Addr::new(octets[0], octets[1], octets[2], 1).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_stats_fall_back_to_default() {
        let json = r#"{"id":"d1","ip":"10.0.0.5","stats":{"load":"high","lastSeen":42}}"#;
        let device: Device = serde_json::from_str(json).unwrap();
        assert_eq!(device.stats, DeviceStats::default());
        assert_eq!(device.role, DeviceRole::Unknown);
    }

    #[test]
    fn test_partial_stats_keep_present_fields() {
        let json = r#"{"id":"d1","ip":"10.0.0.5","role":"switch","stats":{"load":0.5}}"#;
        let device: Device = serde_json::from_str(json).unwrap();
        assert_eq!(device.stats.load, 0.5);
        assert_eq!(device.stats.last_seen, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(device.role, DeviceRole::Switch);
    }

    #[test]
    fn test_unrecognised_role_is_unknown() {
        let json = r#"{"id":"d1","ip":"10.0.0.5","role":"toaster"}"#;
        let device: Device = serde_json::from_str(json).unwrap();
        assert_eq!(device.role, DeviceRole::Unknown);
    }

    #[test]
    fn test_subnet_helpers() {
        assert!(same_subnet("192.168.1.10", "192.168.1.200"));
        assert!(!same_subnet("192.168.1.10", "192.168.2.10"));
        assert!(!same_subnet("not-an-ip", "192.168.2.10"));
        assert_eq!(gateway_guess("10.1.2.77").as_deref(), Some("10.1.2.1"));
        assert_eq!(gateway_guess("fe80::1"), None);
    }
}
