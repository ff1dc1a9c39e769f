//! Probe capability detection
//!
//! Different platforms have different requirements for liveness checks:
//! - Windows: ICMP ping works without admin
//! - Linux: system ping usually has setuid or CAP_NET_RAW; containers often lack both
//! - macOS: ICMP ping works without root for most operations
//!
//! When ping does not work the prober falls back to TCP connect checks.

use super::{LivenessCheck, SystemPing, TcpConnect, hidden_command};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How liveness is tested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessMethod {
    /// Ping if it works here, TCP connect otherwise.
    #[default]
    Auto,
    Ping,
    TcpConnect,
}

impl std::fmt::Display for LivenessMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LivenessMethod::Auto => write!(f, "auto"),
            LivenessMethod::Ping => write!(f, "ping"),
            LivenessMethod::TcpConnect => write!(f, "tcp_connect"),
        }
    }
}

/// What the current process can do for reachability probing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeCapabilities {
    /// Resolved method, never `Auto`.
    pub method: LivenessMethod,
    pub can_ping: bool,
    pub is_elevated: bool,
    pub warning: Option<String>,
}

impl ProbeCapabilities {
    pub fn liveness_check(&self) -> Arc<dyn LivenessCheck> {
        match self.method {
            LivenessMethod::TcpConnect => Arc::new(TcpConnect::default()),
            _ => Arc::new(SystemPing),
        }
    }
}

/// Check if the current process is running with elevated privileges
pub fn is_elevated() -> bool {
    #[cfg(target_os = "windows")]
    {
        match hidden_command("whoami").args(["/groups"]).output() {
            Ok(output) => {
                let output_str = String::from_utf8_lossy(&output.stdout);
                output_str.contains("S-1-16-12288") || output_str.contains("High Mandatory Level")
            }
            Err(_) => false,
        }
    }

    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(any(target_os = "windows", unix)))]
    {
        false
    }
}

/// Test if ping functionality works
pub async fn test_ping_capability() -> bool {
    let result = tokio::task::spawn_blocking(|| {
        #[cfg(target_os = "windows")]
        let output = hidden_command("ping")
            .args(["-n", "1", "-w", "500", "127.0.0.1"])
            .output();

        #[cfg(any(target_os = "linux", target_os = "macos"))]
        let output = hidden_command("ping")
            .args(["-c", "1", "-W", "1", "127.0.0.1"])
            .output();

        #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
        let output: std::io::Result<std::process::Output> =
            Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "Unsupported"));

        match output {
            Ok(o) => o.status.success(),
            Err(_) => false,
        }
    })
    .await;

    result.unwrap_or(false)
}

/// Resolve `requested` against what actually works on this host.
pub async fn detect_capabilities(requested: LivenessMethod) -> ProbeCapabilities {
    let is_elevated = is_elevated();
    let can_ping = match requested {
        LivenessMethod::TcpConnect => false,
        _ => test_ping_capability().await,
    };

    let (method, warning) = match (requested, can_ping) {
        (LivenessMethod::TcpConnect, _) => (LivenessMethod::TcpConnect, None),
        (_, true) => (LivenessMethod::Ping, None),
        (LivenessMethod::Ping, false) => (
            LivenessMethod::Ping,
            Some(
                "System ping is not working; every device will probe as unreachable. \
                 Consider liveness = \"tcp_connect\"."
                    .to_string(),
            ),
        ),
        (LivenessMethod::Auto, false) => (
            LivenessMethod::TcpConnect,
            Some(
                "System ping unavailable, falling back to TCP connect checks. \
                 Hosts with no open common ports will probe as unreachable."
                    .to_string(),
            ),
        ),
    };

    if let Some(ref w) = warning {
        tracing::warn!("{}", w);
    }
    tracing::info!(
        "Liveness method: {} (ping available: {}, elevated: {})",
        method,
        can_ping,
        is_elevated
    );

    ProbeCapabilities {
        method,
        can_ping,
        is_elevated,
        warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forced_tcp_connect_skips_ping() {
        let caps = detect_capabilities(LivenessMethod::TcpConnect).await;
        assert_eq!(caps.method, LivenessMethod::TcpConnect);
        assert!(!caps.can_ping);
        assert!(caps.warning.is_none());
        assert_eq!(caps.liveness_check().name(), "tcp-connect");
    }

    #[tokio::test]
    async fn test_auto_never_stays_auto() {
        let caps = detect_capabilities(LivenessMethod::Auto).await;
        assert_ne!(caps.method, LivenessMethod::Auto);
        assert_eq!(caps.method == LivenessMethod::Ping, caps.can_ping);
    }

    #[test]
    fn test_method_round_trips_through_config_names() {
        let method: LivenessMethod = serde_json::from_str("\"tcp_connect\"").unwrap();
        assert_eq!(method, LivenessMethod::TcpConnect);
        assert_eq!(method.to_string(), "tcp_connect");
    }
}
