//! Reachability probing
//!
//! Devices are probed in fixed-size batches. Each batch runs with bounded
//! concurrency and every probe carries its own deadline; batches run one after
//! another with a short cooldown in between to avoid flooding the segment.
//! A failed probe only ever marks its own device unreachable.

pub mod capabilities;
pub mod ping;

pub use capabilities::{LivenessMethod, ProbeCapabilities, detect_capabilities};
pub use ping::{SystemPing, TcpConnect};

use crate::device::Device;
use crate::error::ProbeFailure;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// Create a Command that hides the console window on Windows.
pub fn hidden_command(program: &str) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
    cmd
}

/// A single liveness check against one address.
#[async_trait]
pub trait LivenessCheck: Send + Sync {
    fn name(&self) -> &'static str;

    /// Round-trip time in milliseconds if the target answered.
    async fn check(&self, ip: &str, timeout: Duration) -> Result<f64, ProbeFailure>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeOptions {
    pub timeout_ms: u64,
    pub max_concurrent: usize,
    pub batch_size: usize,
    /// Extra attempts after the first failure.
    pub retries: u32,
    pub retry_backoff_ms: u64,
    /// Pause between batches.
    pub batch_delay_ms: u64,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            max_concurrent: 20,
            batch_size: 50,
            retries: 0,
            retry_backoff_ms: 250,
            batch_delay_ms: 100,
        }
    }
}

/// Timeout and concurrency for one priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierOptions {
    pub timeout_ms: u64,
    pub max_concurrent: usize,
    pub batch_size: usize,
}

/// Probe settings for the prioritized variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub infrastructure: TierOptions,
    pub servers: TierOptions,
    pub endpoints: TierOptions,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub batch_delay_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            infrastructure: TierOptions {
                timeout_ms: 2000,
                max_concurrent: 5,
                batch_size: 10,
            },
            servers: TierOptions {
                timeout_ms: 1000,
                max_concurrent: 10,
                batch_size: 20,
            },
            endpoints: TierOptions {
                timeout_ms: 500,
                max_concurrent: 50,
                batch_size: 50,
            },
            retries: 1,
            retry_backoff_ms: 250,
            batch_delay_ms: 100,
        }
    }
}

impl ProbeConfig {
    pub fn tier_options(&self, tier: &TierOptions) -> ProbeOptions {
        ProbeOptions {
            timeout_ms: tier.timeout_ms,
            max_concurrent: tier.max_concurrent,
            batch_size: tier.batch_size,
            retries: self.retries,
            retry_backoff_ms: self.retry_backoff_ms,
            batch_delay_ms: self.batch_delay_ms,
        }
    }

    /// Same settings with every tier deadline replaced.
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.infrastructure.timeout_ms = timeout_ms;
        self.servers.timeout_ms = timeout_ms;
        self.endpoints.timeout_ms = timeout_ms;
        self
    }
}

/// Outcome of a probing round.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeReport {
    pub reachable: HashMap<String, bool>,
    pub response_times: HashMap<String, f64>,
    pub attempted: usize,
    pub succeeded: usize,
    pub elapsed_ms: u64,
}

impl ProbeReport {
    pub fn is_reachable(&self, device_id: &str) -> bool {
        self.reachable.get(device_id).copied().unwrap_or(false)
    }

    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.attempted as f64
        }
    }

    fn merge(&mut self, other: ProbeReport) {
        self.reachable.extend(other.reachable);
        self.response_times.extend(other.response_times);
        self.attempted += other.attempted;
        self.succeeded += other.succeeded;
        self.elapsed_ms += other.elapsed_ms;
    }
}

pub struct ReachabilityProber {
    check: Arc<dyn LivenessCheck>,
}

impl std::fmt::Debug for ReachabilityProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachabilityProber")
            .field("check", &self.check.name())
            .finish()
    }
}

impl ReachabilityProber {
    pub fn new(check: Arc<dyn LivenessCheck>) -> Self {
        Self { check }
    }

    pub fn method(&self) -> &'static str {
        self.check.name()
    }

    /// Probe every device in fixed-size batches with bounded concurrency.
    pub async fn probe(&self, devices: &[&Device], options: &ProbeOptions) -> ProbeReport {
        let start = Instant::now();
        let mut report = ProbeReport::default();
        if devices.is_empty() {
            return report;
        }

        let batch_size = options.batch_size.max(1);
        let semaphore = Semaphore::new(options.max_concurrent.max(1));
        let total_batches = devices.len().div_ceil(batch_size);

        for (batch_idx, batch) in devices.chunks(batch_size).enumerate() {
            if batch_idx > 0 && options.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(options.batch_delay_ms)).await;
            }

            let futures = batch.iter().map(|device| {
                let semaphore = &semaphore;
                async move {
                    let _permit = semaphore.acquire().await.ok();
                    let result = self.probe_one(device, options).await;
                    (device.id.clone(), result)
                }
            });

            let mut batch_up = 0;
            for (device_id, result) in join_all(futures).await {
                report.attempted += 1;
                match result {
                    Ok(rtt) => {
                        batch_up += 1;
                        report.succeeded += 1;
                        report.response_times.insert(device_id.clone(), rtt);
                        report.reachable.insert(device_id, true);
                    }
                    Err(failure) => {
                        tracing::debug!("{}", failure);
                        report.reachable.insert(device_id, false);
                    }
                }
            }

            tracing::debug!(
                "Probe batch {}/{}: {}/{} responding",
                batch_idx + 1,
                total_batches,
                batch_up,
                batch.len()
            );
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        report
    }

    /// Probe infrastructure first, then servers, then everything else.
    pub async fn probe_prioritized(&self, devices: &[Device], config: &ProbeConfig) -> ProbeReport {
        let mut infrastructure = Vec::new();
        let mut servers = Vec::new();
        let mut endpoints = Vec::new();

        for device in devices {
            if device.role.is_infrastructure() {
                infrastructure.push(device);
            } else if device.role.is_server_class() {
                servers.push(device);
            } else {
                endpoints.push(device);
            }
        }

        tracing::info!(
            "Probing {} devices ({} infrastructure, {} servers, {} endpoints) via {}",
            devices.len(),
            infrastructure.len(),
            servers.len(),
            endpoints.len(),
            self.method()
        );

        let mut report = ProbeReport::default();
        for (tier, members) in [
            (&config.infrastructure, infrastructure),
            (&config.servers, servers),
            (&config.endpoints, endpoints),
        ] {
            if members.is_empty() {
                continue;
            }
            let tier_report = self.probe(&members, &config.tier_options(tier)).await;
            report.merge(tier_report);
        }

        tracing::info!(
            "Reachability: {}/{} devices responding ({:.0}%) in {}ms",
            report.succeeded,
            report.attempted,
            report.success_rate() * 100.0,
            report.elapsed_ms
        );
        report
    }

    /// One device, with deadline and fixed-backoff retries.
    async fn probe_one(&self, device: &Device, options: &ProbeOptions) -> Result<f64, ProbeFailure> {
        if device.ipv4().is_none() {
            return Err(ProbeFailure::CheckFailed {
                target: device.ip.clone(),
                message: "not an IPv4 address".to_string(),
            });
        }

        let timeout = Duration::from_millis(options.timeout_ms.max(1));
        let mut attempt = 0;

        loop {
            let result = match tokio::time::timeout(timeout, self.check.check(&device.ip, timeout)).await
            {
                Ok(result) => result,
                Err(_) => Err(ProbeFailure::Timeout {
                    target: device.ip.clone(),
                    timeout_ms: options.timeout_ms,
                }),
            };

            match result {
                Ok(rtt) => return Ok(rtt),
                Err(failure) if attempt < options.retries => {
                    attempt += 1;
                    tracing::trace!(
                        "Retrying {} ({}/{}) after: {}",
                        device.ip,
                        attempt,
                        options.retries,
                        failure
                    );
                    tokio::time::sleep(Duration::from_millis(options.retry_backoff_ms)).await;
                }
                Err(failure) => return Err(failure),
            }
        }
    }
}
