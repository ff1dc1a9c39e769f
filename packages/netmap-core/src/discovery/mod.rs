//! Protocol link discovery
//!
//! Reachable switch-class devices are polled for their bridge forwarding table
//! (`dot1dTpFdbTable`). Every surviving `{hardware address, port}` entry that
//! resolves to a known node becomes a high-confidence link from the switch to
//! that node. Polls are batched with a parallelism cap and cached per
//! `(address, credential)` for a short window.

#[cfg(feature = "snmp")]
pub mod snmp;

#[cfg(feature = "snmp")]
pub use snmp::SnmpTransport;

use crate::cache::{CacheStats, TtlCache};
use crate::classifier::oui::normalize_mac;
use crate::device::Device;
use crate::error::ProtocolError;
use crate::probe::ProbeReport;
use crate::topology::{ConfidenceLevel, LinkType, TopologyLink};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// `dot1dTpFdbAddress`: learned hardware address per forwarding row.
pub const FDB_ADDRESS_OID: &str = "1.3.6.1.2.1.17.4.3.1.1";
/// `dot1dTpFdbPort`: bridge port the address was learned on.
pub const FDB_PORT_OID: &str = "1.3.6.1.2.1.17.4.3.1.2";

#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolValue {
    OctetString(Vec<u8>),
    Integer(i64),
    Other(String),
}

/// One row of a table walk.
#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: String,
    pub value: ProtocolValue,
}

impl VarBind {
    pub fn new(oid: impl Into<String>, value: ProtocolValue) -> Self {
        Self {
            oid: oid.into(),
            value,
        }
    }
}

/// Read-only table walk against one device.
#[async_trait]
pub trait ProtocolTransport: Send + Sync {
    /// Short protocol name recorded in link reasoning.
    fn protocol(&self) -> &'static str;

    /// Every row under `oid`, in walk order.
    async fn walk(&self, target: &str, credential: &str, oid: &str)
    -> Result<Vec<VarBind>, ProtocolError>;
}

/// A forwarding-table row before validation. The address is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingEntry {
    pub hardware_address: String,
    pub port: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// Community string for SNMPv2c.
    pub credential: String,
    pub max_parallel: usize,
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub poll_timeout_ms: u64,
    pub cache_ttl_ms: u64,
    pub cache_capacity: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            credential: "public".to_string(),
            max_parallel: 8,
            batch_size: 16,
            batch_delay_ms: 100,
            poll_timeout_ms: 3000,
            cache_ttl_ms: 60_000,
            cache_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoveryReport {
    pub links: Vec<TopologyLink>,
    pub switches_polled: usize,
    pub polls_issued: usize,
    pub polls_failed: usize,
    pub cache_hits: usize,
    pub entries_seen: usize,
    pub entries_discarded: usize,
}

/// Row index under `column`, i.e. the OID suffix after `column.`.
fn row_index<'a>(oid: &'a str, column: &str) -> Option<&'a str> {
    let oid = oid.strip_prefix('.').unwrap_or(oid);
    oid.strip_prefix(column)?.strip_prefix('.')
}

/// Bridge-MIB rows are indexed by the address itself as six decimal octets.
fn address_from_index(index: &str) -> Option<String> {
    let octets: Vec<u8> = index
        .split('.')
        .map(|part| part.parse::<u8>())
        .collect::<Result<_, _>>()
        .ok()?;
    if octets.len() != 6 {
        return None;
    }
    Some(format_octets(&octets))
}

fn format_octets(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn address_from_value(value: &ProtocolValue) -> Option<String> {
    match value {
        ProtocolValue::OctetString(bytes) if bytes.len() == 6 => Some(format_octets(bytes)),
        ProtocolValue::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).trim().to_string()),
        ProtocolValue::Other(text) => Some(text.clone()),
        ProtocolValue::Integer(_) => None,
    }
}

/// Join the address and port columns of `dot1dTpFdbTable` by row index.
///
/// The port column drives the result; an address is taken from the address
/// column when present, else decoded from the row index.
pub fn parse_forwarding_table(addresses: &[VarBind], ports: &[VarBind]) -> Vec<ForwardingEntry> {
    let by_index: HashMap<&str, &ProtocolValue> = addresses
        .iter()
        .filter_map(|vb| row_index(&vb.oid, FDB_ADDRESS_OID).map(|idx| (idx, &vb.value)))
        .collect();

    let mut entries = Vec::with_capacity(ports.len());
    for vb in ports {
        let Some(index) = row_index(&vb.oid, FDB_PORT_OID) else {
            tracing::trace!("Ignoring row outside the port column: {}", vb.oid);
            continue;
        };
        let port = match vb.value {
            ProtocolValue::Integer(p) if p >= 0 && p <= u32::MAX as i64 => p as u32,
            _ => {
                tracing::trace!("Ignoring non-integer port at {}", vb.oid);
                continue;
            }
        };
        let address = by_index
            .get(index)
            .and_then(|value| address_from_value(value))
            .or_else(|| address_from_index(index));

        if let Some(hardware_address) = address {
            entries.push(ForwardingEntry {
                hardware_address,
                port,
            });
        }
    }
    entries
}

/// Turn one switch's table into links, discarding malformed, duplicate,
/// unknown and self-referencing addresses. Returns links and discard count.
pub fn links_from_table(
    switch: &Device,
    table: &[ForwardingEntry],
    nodes_by_mac: &HashMap<String, String>,
    protocol: &str,
) -> (Vec<TopologyLink>, usize) {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut discarded = 0;

    for entry in table {
        let Some(mac) = normalize_mac(&entry.hardware_address) else {
            tracing::debug!(
                "Discarding malformed address '{}' from {}",
                entry.hardware_address,
                switch.ip
            );
            discarded += 1;
            continue;
        };
        if !seen.insert(mac.clone()) {
            discarded += 1;
            continue;
        }
        let Some(node_id) = nodes_by_mac.get(&mac) else {
            discarded += 1;
            continue;
        };
        if node_id == &switch.id {
            discarded += 1;
            continue;
        }

        let mut link = TopologyLink::new(
            LinkType::ProtocolDerived,
            &switch.id,
            node_id,
            ConfidenceLevel::High,
            format!(
                "{} bridge forwarding table on {} lists {} on port {}",
                protocol, switch.ip, mac, entry.port
            ),
        );
        link.port = Some(entry.port);
        links.push(link);
    }

    (links, discarded)
}

pub struct LinkDiscoverer {
    transport: Arc<dyn ProtocolTransport>,
    cache: TtlCache<(String, String), Arc<Vec<ForwardingEntry>>>,
    polls_issued: AtomicU64,
}

impl std::fmt::Debug for LinkDiscoverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkDiscoverer")
            .field("protocol", &self.transport.protocol())
            .field("polls_issued", &self.polls_issued.load(Ordering::Relaxed))
            .finish()
    }
}

enum PollOutcome {
    Cached(Arc<Vec<ForwardingEntry>>),
    Polled(Arc<Vec<ForwardingEntry>>),
    Failed,
}

impl LinkDiscoverer {
    pub fn new(transport: Arc<dyn ProtocolTransport>, options: &DiscoveryOptions) -> Self {
        Self {
            transport,
            cache: TtlCache::new(
                Duration::from_millis(options.cache_ttl_ms),
                options.cache_capacity,
            ),
            polls_issued: AtomicU64::new(0),
        }
    }

    /// Total polls sent over the lifetime of this discoverer.
    pub fn polls_issued(&self) -> u64 {
        self.polls_issued.load(Ordering::Relaxed)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Poll every reachable switch and convert the tables into links.
    pub async fn discover(
        &self,
        devices: &[Device],
        reachability: &ProbeReport,
        options: &DiscoveryOptions,
    ) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();

        let switches: Vec<&Device> = devices
            .iter()
            .filter(|d| d.role.is_switch_class() && reachability.is_reachable(&d.id))
            .collect();
        if switches.is_empty() {
            tracing::debug!("No reachable switches to poll");
            return report;
        }

        let nodes_by_mac: HashMap<String, String> = devices
            .iter()
            .filter_map(|d| {
                let mac = normalize_mac(d.mac.as_deref()?)?;
                Some((mac, d.id.clone()))
            })
            .collect();

        tracing::info!(
            "Polling {} switches for forwarding tables via {}",
            switches.len(),
            self.transport.protocol()
        );

        let semaphore = Semaphore::new(options.max_parallel.max(1));
        let batch_size = options.batch_size.max(1);

        for (batch_idx, batch) in switches.chunks(batch_size).enumerate() {
            if batch_idx > 0 && options.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(options.batch_delay_ms)).await;
            }

            let polls = batch.iter().map(|switch| {
                let semaphore = &semaphore;
                async move {
                    let _permit = semaphore.acquire().await.ok();
                    (*switch, self.poll(switch, options).await)
                }
            });

            for (switch, outcome) in join_all(polls).await {
                report.switches_polled += 1;
                let table = match outcome {
                    PollOutcome::Cached(table) => {
                        report.cache_hits += 1;
                        table
                    }
                    PollOutcome::Polled(table) => {
                        report.polls_issued += 1;
                        table
                    }
                    PollOutcome::Failed => {
                        report.polls_issued += 1;
                        report.polls_failed += 1;
                        continue;
                    }
                };

                report.entries_seen += table.len();
                let (links, discarded) = links_from_table(
                    switch,
                    &table,
                    &nodes_by_mac,
                    self.transport.protocol(),
                );
                report.entries_discarded += discarded;
                tracing::debug!(
                    "{}: {} forwarding entries, {} links, {} discarded",
                    switch.ip,
                    table.len(),
                    links.len(),
                    discarded
                );
                report.links.extend(links);
            }
        }

        tracing::info!(
            "Protocol discovery: {} links from {} switches ({} polls, {} failed, {} cached)",
            report.links.len(),
            report.switches_polled,
            report.polls_issued,
            report.polls_failed,
            report.cache_hits
        );
        report
    }

    async fn poll(&self, switch: &Device, options: &DiscoveryOptions) -> PollOutcome {
        let key = (switch.ip.clone(), options.credential.clone());
        if let Some(table) = self.cache.get(&key) {
            return PollOutcome::Cached(table);
        }

        self.polls_issued.fetch_add(1, Ordering::Relaxed);
        let timeout_ms = options.poll_timeout_ms.max(1);

        let walk = async {
            let addresses = self
                .transport
                .walk(&switch.ip, &options.credential, FDB_ADDRESS_OID)
                .await?;
            let ports = self
                .transport
                .walk(&switch.ip, &options.credential, FDB_PORT_OID)
                .await?;
            Ok::<_, ProtocolError>(parse_forwarding_table(&addresses, &ports))
        };

        let result = match tokio::time::timeout(Duration::from_millis(timeout_ms), walk).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout {
                target: switch.ip.clone(),
                timeout_ms,
            }),
        };

        match result {
            Ok(entries) => {
                let table = Arc::new(entries);
                self.cache.insert(key, table.clone());
                PollOutcome::Polled(table)
            }
            Err(e) => {
                tracing::warn!("Forwarding-table poll of {} failed: {}", switch.ip, e);
                PollOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRole;
    use std::sync::Mutex;

    /// Serves canned tables per target and counts walks.
    struct CannedTransport {
        tables: HashMap<String, (Vec<VarBind>, Vec<VarBind>)>,
        walks: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProtocolTransport for CannedTransport {
        fn protocol(&self) -> &'static str {
            "snmp"
        }

        async fn walk(
            &self,
            target: &str,
            _credential: &str,
            oid: &str,
        ) -> Result<Vec<VarBind>, ProtocolError> {
            self.walks.lock().unwrap().push(format!("{target} {oid}"));
            let (addresses, ports) = self.tables.get(target).ok_or_else(|| ProtocolError::Transport {
                target: target.to_string(),
                message: "no response".to_string(),
            })?;
            Ok(if oid == FDB_ADDRESS_OID {
                addresses.clone()
            } else {
                ports.clone()
            })
        }
    }

    fn addr(index: &str, bytes: &[u8]) -> VarBind {
        VarBind::new(
            format!("{FDB_ADDRESS_OID}.{index}"),
            ProtocolValue::OctetString(bytes.to_vec()),
        )
    }

    fn port(index: &str, port: i64) -> VarBind {
        VarBind::new(format!("{FDB_PORT_OID}.{index}"), ProtocolValue::Integer(port))
    }

    fn network() -> Vec<Device> {
        vec![
            Device::new("sw1", "10.0.0.2")
                .with_role(DeviceRole::Switch)
                .with_mac("00:00:00:00:00:02"),
            Device::new("pc1", "10.0.0.10").with_mac("AA:BB:CC:00:00:10"),
            Device::new("pc2", "10.0.0.11").with_mac("aa-bb-cc-00-00-11"),
            Device::new("sw2", "10.0.0.3").with_role(DeviceRole::Switch),
        ]
    }

    fn all_reachable(devices: &[Device]) -> ProbeReport {
        ProbeReport {
            reachable: devices.iter().map(|d| (d.id.clone(), true)).collect(),
            ..ProbeReport::default()
        }
    }

    #[test]
    fn test_parse_joins_columns_by_index() {
        let addresses = vec![
            addr("170.187.204.0.0.16", &[0xAA, 0xBB, 0xCC, 0, 0, 0x10]),
            VarBind::new(
                format!("{FDB_ADDRESS_OID}.1.2.3.4.5.6"),
                ProtocolValue::OctetString(b"not-a-mac".to_vec()),
            ),
        ];
        let ports = vec![
            port("170.187.204.0.0.16", 3),
            port("1.2.3.4.5.6", 4),
            // no address row: decoded from the index
            port("170.187.204.0.0.17", 5),
            VarBind::new("1.3.6.1.2.1.1.5.0", ProtocolValue::Integer(1)),
        ];

        let entries = parse_forwarding_table(&addresses, &ports);
        assert_eq!(
            entries,
            vec![
                ForwardingEntry {
                    hardware_address: "AA:BB:CC:00:00:10".to_string(),
                    port: 3
                },
                ForwardingEntry {
                    hardware_address: "not-a-mac".to_string(),
                    port: 4
                },
                ForwardingEntry {
                    hardware_address: "AA:BB:CC:00:00:11".to_string(),
                    port: 5
                },
            ]
        );
    }

    #[test]
    fn test_links_from_table_filters_entries() {
        let devices = network();
        let nodes_by_mac: HashMap<String, String> = [
            ("00:00:00:00:00:02".to_string(), "sw1".to_string()),
            ("AA:BB:CC:00:00:10".to_string(), "pc1".to_string()),
        ]
        .into_iter()
        .collect();

        let table = vec![
            ForwardingEntry { hardware_address: "not-a-mac".into(), port: 1 },
            ForwardingEntry { hardware_address: "aa:bb:cc:00:00:10".into(), port: 2 },
            ForwardingEntry { hardware_address: "AA-BB-CC-00-00-10".into(), port: 9 },
            ForwardingEntry { hardware_address: "de:ad:be:ef:00:01".into(), port: 3 },
            ForwardingEntry { hardware_address: "00:00:00:00:00:02".into(), port: 4 },
        ];

        let (links, discarded) = links_from_table(&devices[0], &table, &nodes_by_mac, "snmp");
        assert_eq!(discarded, 4);
        assert_eq!(links.len(), 1);
        let link = &links[0];
        assert_eq!(link.source_node_id, "sw1");
        assert_eq!(link.target_node_id, "pc1");
        assert_eq!(link.port, Some(2));
        assert_eq!(link.confidence, ConfidenceLevel::High);
        assert_eq!(link.link_type, LinkType::ProtocolDerived);
        assert!(link.reasoning.contains("port 2"));
    }

    #[tokio::test]
    async fn test_discover_uses_cache_and_absorbs_failures() {
        let devices = network();
        let mut tables = HashMap::new();
        tables.insert(
            "10.0.0.2".to_string(),
            (
                vec![
                    addr("1", &[0xAA, 0xBB, 0xCC, 0, 0, 0x10]),
                    VarBind::new(
                        format!("{FDB_ADDRESS_OID}.2"),
                        ProtocolValue::OctetString(b"not-a-mac".to_vec()),
                    ),
                    addr("3", &[0xAA, 0xBB, 0xCC, 0, 0, 0x11]),
                ],
                vec![port("1", 1), port("2", 2), port("3", 3)],
            ),
        );
        // sw2 (10.0.0.3) has no table: its poll fails
        let transport = Arc::new(CannedTransport {
            tables,
            walks: Mutex::new(Vec::new()),
        });
        let options = DiscoveryOptions {
            batch_delay_ms: 0,
            ..DiscoveryOptions::default()
        };
        let discoverer = LinkDiscoverer::new(transport.clone(), &options);
        let reachability = all_reachable(&devices);

        let first = discoverer.discover(&devices, &reachability, &options).await;
        assert_eq!(first.switches_polled, 2);
        assert_eq!(first.polls_failed, 1);
        assert_eq!(first.links.len(), 2);
        assert_eq!(first.entries_discarded, 1);
        assert_eq!(discoverer.polls_issued(), 2);

        let second = discoverer.discover(&devices, &reachability, &options).await;
        assert_eq!(second.cache_hits, 1);
        assert_eq!(second.links.len(), 2);
        // the failed switch is retried, the cached one is not
        assert_eq!(discoverer.polls_issued(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_switches_are_not_polled() {
        let devices = network();
        let transport = Arc::new(CannedTransport {
            tables: HashMap::new(),
            walks: Mutex::new(Vec::new()),
        });
        let options = DiscoveryOptions::default();
        let discoverer = LinkDiscoverer::new(transport.clone(), &options);

        let report = discoverer
            .discover(&devices, &ProbeReport::default(), &options)
            .await;
        assert_eq!(report, DiscoveryReport::default());
        assert!(transport.walks.lock().unwrap().is_empty());
    }
}
