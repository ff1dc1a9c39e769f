//! Liveness checks: system ping and TCP connect

use super::{LivenessCheck, hidden_command};
use crate::error::ProbeFailure;
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Echo request through the system `ping` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPing;

#[async_trait]
impl LivenessCheck for SystemPing {
    fn name(&self) -> &'static str {
        "ping"
    }

    async fn check(&self, ip: &str, timeout: Duration) -> Result<f64, ProbeFailure> {
        let start = Instant::now();
        let check_failed = |e: std::io::Error| ProbeFailure::CheckFailed {
            target: ip.to_string(),
            message: e.to_string(),
        };

        let command = ping_command(ip, timeout).map_err(check_failed)?;
        let output = match output_within(command, timeout).await.map_err(check_failed)? {
            Some(output) => output,
            None => {
                return Err(ProbeFailure::Timeout {
                    target: ip.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let output_str = String::from_utf8_lossy(&output.stdout);

        if !ping_succeeded(output.status.success(), &output_str) {
            return Err(ProbeFailure::Unreachable {
                target: ip.to_string(),
            });
        }

        Ok(parse_ping_time(&output_str).unwrap_or(elapsed_ms))
    }
}

/// Run `command` to completion, or kill it once `deadline` passes (`Ok(None)`).
pub async fn output_within(
    command: std::process::Command,
    deadline: Duration,
) -> std::io::Result<Option<std::process::Output>> {
    let mut command = tokio::process::Command::from(command);
    command.kill_on_drop(true);

    match tokio::time::timeout(deadline, command.output()).await {
        Ok(output) => output.map(Some),
        Err(_) => Ok(None),
    }
}

/// Single echo request with the platform's own wait flag.
fn ping_command(ip: &str, timeout: Duration) -> std::io::Result<std::process::Command> {
    #[cfg(target_os = "windows")]
    {
        let wait_ms = timeout.as_millis().max(1).to_string();
        let mut cmd = hidden_command("ping");
        cmd.args(["-n", "1", "-w", &wait_ms, ip]);
        Ok(cmd)
    }

    // Linux takes whole seconds for -W; the caller's deadline kills it sooner.
    #[cfg(target_os = "linux")]
    {
        let wait_secs = timeout.as_secs().max(1).to_string();
        let mut cmd = hidden_command("ping");
        cmd.args(["-c", "1", "-W", &wait_secs, ip]);
        Ok(cmd)
    }

    // macOS takes milliseconds for -W
    #[cfg(target_os = "macos")]
    {
        let wait_ms = timeout.as_millis().max(1).to_string();
        let mut cmd = hidden_command("ping");
        cmd.args(["-c", "1", "-W", &wait_ms, ip]);
        Ok(cmd)
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        let _ = (hidden_command, ip, timeout);
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Unsupported platform",
        ))
    }
}

/// Windows `ping` exits 0 on "destination host unreachable", so its output is
/// inspected instead of the status.
fn ping_succeeded(status_ok: bool, output: &str) -> bool {
    if cfg!(target_os = "windows") {
        let output_lower = output.to_lowercase();
        if output_lower.contains("request timed out")
            || output_lower.contains("destination host unreachable")
            || output_lower.contains("transmit failed")
            || output_lower.contains("general failure")
        {
            return false;
        }
        output_lower.contains("reply from")
    } else {
        status_ok
    }
}

/// Parse ping response time from command output
pub fn parse_ping_time(output: &str) -> Option<f64> {
    for word in output.split_whitespace() {
        if word.starts_with("time=") || word.starts_with("time<") {
            let time_str = word
                .trim_start_matches("time=")
                .trim_start_matches("time<")
                .trim_end_matches("ms");

            if let Ok(time) = time_str.parse::<f64>() {
                return Some(time);
            }
        }
    }
    None
}

/// TCP connect to a short list of common ports. A refused connection still
/// proves the host is up.
#[derive(Debug, Clone)]
pub struct TcpConnect {
    ports: Vec<u16>,
}

impl Default for TcpConnect {
    fn default() -> Self {
        Self {
            ports: vec![80, 443, 22, 445, 139, 53, 8080],
        }
    }
}

impl TcpConnect {
    pub fn new(ports: Vec<u16>) -> Self {
        Self { ports }
    }

    pub fn ports(&self) -> &[u16] {
        &self.ports
    }
}

#[async_trait]
impl LivenessCheck for TcpConnect {
    fn name(&self) -> &'static str {
        "tcp-connect"
    }

    async fn check(&self, ip: &str, timeout: Duration) -> Result<f64, ProbeFailure> {
        let addr: IpAddr = ip.parse().map_err(|_| ProbeFailure::CheckFailed {
            target: ip.to_string(),
            message: "invalid address".to_string(),
        })?;

        if self.ports.is_empty() {
            return Err(ProbeFailure::CheckFailed {
                target: ip.to_string(),
                message: "no ports configured".to_string(),
            });
        }

        // Split the deadline across ports so the whole check honours it.
        let per_attempt = (timeout / self.ports.len() as u32).max(Duration::from_millis(50));
        let start = Instant::now();

        for &port in &self.ports {
            let socket = SocketAddr::new(addr, port);
            match tokio::time::timeout(per_attempt, TcpStream::connect(socket)).await {
                Ok(Ok(_)) => return Ok(start.elapsed().as_secs_f64() * 1000.0),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    return Ok(start.elapsed().as_secs_f64() * 1000.0);
                }
                _ => {}
            }
            if start.elapsed() >= timeout {
                break;
            }
        }

        Err(ProbeFailure::Unreachable {
            target: ip.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_ping_time_unix() {
        let output = "64 bytes from 10.0.0.1: icmp_seq=1 ttl=64 time=0.412 ms";
        assert_eq!(parse_ping_time(output), Some(0.412));
    }

    #[test]
    fn test_parse_ping_time_windows() {
        let output = "Reply from 10.0.0.1: bytes=32 time<1ms TTL=128";
        assert_eq!(parse_ping_time(output), Some(1.0));
        let output = "Reply from 10.0.0.1: bytes=32 time=14ms TTL=128";
        assert_eq!(parse_ping_time(output), Some(14.0));
    }

    #[test]
    fn test_parse_ping_time_missing() {
        assert_eq!(parse_ping_time("Request timed out."), None);
    }

    #[tokio::test]
    async fn test_tcp_connect_to_listening_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let check = TcpConnect::new(vec![port]);
        let rtt = check
            .check("127.0.0.1", Duration::from_millis(500))
            .await
            .unwrap();
        assert!(rtt >= 0.0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_overdue_command_is_killed() {
        let marker = std::env::temp_dir().join(format!("netmap-ping-{}", uuid::Uuid::new_v4()));
        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c").arg(format!("sleep 1; touch {}", marker.display()));

        let started = Instant::now();
        let output = output_within(cmd, Duration::from_millis(100)).await.unwrap();
        assert!(output.is_none());
        assert!(started.elapsed() < Duration::from_millis(900));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_finishing_in_time_returns_output() {
        let mut cmd = std::process::Command::new("sh");
        cmd.arg("-c").arg("echo time=0.5 ms");

        let output = output_within(cmd, Duration::from_secs(5)).await.unwrap().unwrap();
        assert!(output.status.success());
        assert_eq!(parse_ping_time(&String::from_utf8_lossy(&output.stdout)), Some(0.5));
    }

    #[tokio::test]
    async fn test_tcp_connect_rejects_bad_address() {
        let check = TcpConnect::default();
        let result = check.check("nope", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ProbeFailure::CheckFailed { .. })));
    }
}
