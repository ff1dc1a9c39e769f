//! Local ARP table inventory using system commands

use async_trait::async_trait;
use netmap_core::classifier::oui::{VendorLookup, normalize_mac};
use netmap_core::error::InventoryError;
use netmap_core::inventory::{DeviceInventory, filter_recent};
use netmap_core::probe::hidden_command;
use netmap_core::Device;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// One neighbour entry: IPv4 address and normalized MAC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: String,
    pub mac: String,
}

/// Keep unicast IPv4 neighbours with a real hardware address.
fn entry(ip: &str, mac: &str) -> Option<ArpEntry> {
    let addr: Ipv4Addr = ip.parse().ok()?;
    if addr.is_multicast() || addr.is_broadcast() || addr.octets()[3] == 255 {
        return None;
    }
    let mac = normalize_mac(mac)?;
    if mac == "00:00:00:00:00:00" || mac == "FF:FF:FF:FF:FF:FF" {
        return None;
    }
    Some(ArpEntry {
        ip: ip.to_string(),
        mac,
    })
}

/// Pad `a:b:c:d:e:f` (as printed by macOS) to two hex digits per octet.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn pad_mac(mac: &str) -> String {
    mac.split(':')
        .map(|part| format!("{:0>2}", part))
        .collect::<Vec<_>>()
        .join(":")
}

/// `arp -n` on Linux: `Address HWtype HWaddress Flags Mask Iface`
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub fn parse_linux(output: &str) -> Vec<ArpEntry> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                return None;
            }
            entry(parts[0], parts[2])
        })
        .collect()
}

/// `arp -a -n` on macOS: `? (192.168.1.1) at 0:11:22:33:44:55 on en0 ifscope [ethernet]`
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub fn parse_macos(output: &str) -> Vec<ArpEntry> {
    output
        .lines()
        .filter_map(|line| {
            let ip_start = line.find('(')?;
            let ip_end = line.find(')')?;
            let ip = line.get(ip_start + 1..ip_end)?;
            let at_pos = line.find(" at ")?;
            let mac = line[at_pos + 4..].split_whitespace().next()?;
            entry(ip, &pad_mac(mac))
        })
        .collect()
}

/// `arp -a` on Windows: `  192.168.1.1   00-11-22-33-44-55   dynamic`
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub fn parse_windows(output: &str) -> Vec<ArpEntry> {
    let mut by_ip: HashMap<String, ArpEntry> = HashMap::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("Interface") || line.contains("Internet Address") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        if let Some(e) = entry(parts[0], parts[1]) {
            by_ip.entry(e.ip.clone()).or_insert(e);
        }
    }

    let mut entries: Vec<ArpEntry> = by_ip.into_values().collect();
    entries.sort_by(|a, b| a.ip.cmp(&b.ip));
    entries
}

fn read_arp_table() -> std::io::Result<Vec<ArpEntry>> {
    #[cfg(target_os = "windows")]
    {
        let output = hidden_command("arp").args(["-a"]).output()?;
        Ok(parse_windows(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(target_os = "linux")]
    {
        let output = hidden_command("arp").args(["-n"]).output()?;
        Ok(parse_linux(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(target_os = "macos")]
    {
        let output = hidden_command("arp").args(["-a", "-n"]).output()?;
        Ok(parse_macos(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        let _ = hidden_command;
        Ok(Vec::new())
    }
}

/// Devices from the local neighbour table, named by vendor where known.
pub struct ArpInventory {
    vendors: Arc<VendorLookup>,
    window: chrono::Duration,
}

impl std::fmt::Debug for ArpInventory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArpInventory")
            .field("window", &self.window)
            .finish()
    }
}

impl ArpInventory {
    pub fn new(vendors: Arc<VendorLookup>, window: chrono::Duration) -> Self {
        Self { vendors, window }
    }

    /// Turn neighbour entries into devices keyed by hardware address.
    pub fn devices_from_entries(&self, entries: Vec<ArpEntry>, now: chrono::DateTime<chrono::Utc>) -> Vec<Device> {
        entries
            .into_iter()
            .map(|e| {
                let mut device = Device::new(e.mac.replace(':', "").to_lowercase(), e.ip)
                    .with_last_seen(now);
                device.vendor = self.vendors.vendor_name(&e.mac);
                device.mac = Some(e.mac);
                device
            })
            .collect()
    }
}

#[async_trait]
impl DeviceInventory for ArpInventory {
    async fn list_active_devices(&self) -> Result<Vec<Device>, InventoryError> {
        let entries = tokio::task::spawn_blocking(read_arp_table)
            .await
            .map_err(|e| InventoryError::Unavailable(format!("arp task failed: {}", e)))?
            .map_err(|e| InventoryError::Unavailable(format!("arp: {}", e)))?;

        let now = chrono::Utc::now();
        let devices = filter_recent(self.devices_from_entries(entries, now), self.window, now);
        tracing::debug!("ARP table: {} neighbours", devices.len());
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmap_core::classifier::oui::StaticVendorTable;

    #[test]
    fn test_parse_linux() {
        let output = "\
Address                  HWtype  HWaddress           Flags Mask            Iface
192.168.1.1              ether   00:17:f2:aa:bb:cc   C                     eth0
192.168.1.20                     (incomplete)                              eth0
192.168.1.30             ether   00:00:00:00:00:00   C                     eth0
192.168.1.40             ether   a4:5e:60:01:02:03   C                     eth0
";
        let entries = parse_linux(output);
        assert_eq!(
            entries,
            vec![
                ArpEntry {
                    ip: "192.168.1.1".to_string(),
                    mac: "00:17:F2:AA:BB:CC".to_string()
                },
                ArpEntry {
                    ip: "192.168.1.40".to_string(),
                    mac: "A4:5E:60:01:02:03".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_parse_macos_pads_octets() {
        let output = "\
? (192.168.1.1) at 0:17:f2:a:b:c on en0 ifscope [ethernet]
? (192.168.1.9) at (incomplete) on en0 ifscope [ethernet]
? (224.0.0.251) at 1:0:5e:0:0:fb on en0 ifscope permanent [ethernet]
";
        let entries = parse_macos(output);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mac, "00:17:F2:0A:0B:0C");
    }

    #[test]
    fn test_parse_windows() {
        let output = "
Interface: 192.168.1.50 --- 0x4
  Internet Address      Physical Address      Type
  192.168.1.1           00-17-f2-aa-bb-cc     dynamic
  192.168.1.255         ff-ff-ff-ff-ff-ff     static
  239.255.255.250       01-00-5e-7f-ff-fa     static

Interface: 10.0.0.5 --- 0x7
  Internet Address      Physical Address      Type
  192.168.1.1           00-17-f2-aa-bb-cc     dynamic
";
        let entries = parse_windows(output);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ip, "192.168.1.1");
        assert_eq!(entries[0].mac, "00:17:F2:AA:BB:CC");
    }

    #[test]
    fn test_devices_are_enriched_with_vendor() {
        let vendors = VendorLookup::new(StaticVendorTable::new([("00:17:F2", "Apple, Inc.")]));
        let inventory = ArpInventory::new(Arc::new(vendors), chrono::Duration::hours(1));
        let now = chrono::Utc::now();

        let devices = inventory.devices_from_entries(
            vec![ArpEntry {
                ip: "192.168.1.1".to_string(),
                mac: "00:17:F2:AA:BB:CC".to_string(),
            }],
            now,
        );

        assert_eq!(devices[0].id, "0017f2aabbcc");
        assert_eq!(devices[0].vendor.as_deref(), Some("Apple, Inc."));
        assert_eq!(devices[0].stats.last_seen, now);
    }
}
