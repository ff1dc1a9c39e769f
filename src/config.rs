//! Agent configuration
//!
//! Resolution order:
//! 1. `NETMAP_CONFIG` environment variable (path to a TOML file)
//! 2. Config file (`~/.config/netmap/config.toml`)
//! 3. Default values

use netmap_core::PipelineConfig;
use netmap_core::probe::LivenessMethod;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
const ENV_CONFIG_PATH: &str = "NETMAP_CONFIG";

/// Default recency window for inventory devices
const DEFAULT_RECENCY_HOURS: i64 = 24;

/// Where the device snapshot comes from
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InventorySource {
    /// Local ARP table
    #[default]
    Arp,
    /// JSON array of devices on disk
    File { path: PathBuf },
    /// HTTP endpoint returning a JSON array of devices
    Http {
        url: String,
        #[serde(default = "default_http_timeout")]
        timeout_secs: u64,
    },
}

fn default_http_timeout() -> u64 {
    10
}

impl std::fmt::Display for InventorySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InventorySource::Arp => write!(f, "arp table"),
            InventorySource::File { path } => write!(f, "file {}", path.display()),
            InventorySource::Http { url, .. } => write!(f, "http {}", url),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub inventory: InventorySource,
    /// Devices not seen within this many hours are left out
    pub recency_hours: i64,
    /// Topology store; platform data dir when unset
    pub storage_dir: Option<PathBuf>,
    pub liveness: LivenessMethod,
    pub pipeline: PipelineConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            inventory: InventorySource::default(),
            recency_hours: DEFAULT_RECENCY_HOURS,
            storage_dir: None,
            liveness: LivenessMethod::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AgentConfig {
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(default_storage_dir)
    }
}

/// Where the configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Using default values
    Default,
    /// File named by the environment variable
    Environment(PathBuf),
    /// Platform config file
    ConfigFile(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::Environment(path) => {
                write!(f, "{} ({})", path.display(), ENV_CONFIG_PATH)
            }
            ConfigSource::ConfigFile(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Get the path to the platform configuration file
fn get_config_file_path() -> Option<PathBuf> {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("netmap").join("config.toml"))
}

fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("netmap")
        .join("topologies")
}

pub fn parse_config(content: &str) -> Result<AgentConfig, toml::de::Error> {
    toml::from_str(content)
}

fn load_config_file(path: &Path) -> Option<AgentConfig> {
    if !path.exists() {
        return None;
    }

    match fs::read_to_string(path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::debug!("Loaded config from {:?}", path);
                Some(config)
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("Failed to read config file {:?}: {}", path, e);
            None
        }
    }
}

/// Load the agent configuration with env var, file, default priority.
pub fn load_agent_config() -> (AgentConfig, ConfigSource) {
    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(path.trim());
        if !path.as_os_str().is_empty() {
            if let Some(config) = load_config_file(&path) {
                tracing::info!("Using config from {}: {:?}", ENV_CONFIG_PATH, path);
                return (config, ConfigSource::Environment(path));
            }
            tracing::warn!(
                "{} points at {:?}, which could not be loaded; trying defaults",
                ENV_CONFIG_PATH,
                path
            );
        }
    }

    if let Some(path) = get_config_file_path() {
        if let Some(config) = load_config_file(&path) {
            return (config, ConfigSource::ConfigFile(path));
        }
    }

    tracing::debug!("Using default configuration");
    (AgentConfig::default(), ConfigSource::Default)
}

/// Get the path to the config file for documentation purposes
pub fn get_config_file_path_string() -> String {
    get_config_file_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/netmap/config.toml".to_string())
}

/// Generate example config file content
pub fn generate_example_config() -> String {
    r#"# netmap agent configuration
# Place this file at: ~/.config/netmap/config.toml
# or point NETMAP_CONFIG at it.

# Devices not seen within this many hours are ignored
recency_hours = 24

# Liveness check: "auto", "ping" or "tcp_connect"
liveness = "auto"

# storage_dir = "/var/lib/netmap/topologies"

[inventory]
kind = "arp"
# kind = "file"
# path = "/var/lib/netmap/devices.json"
# kind = "http"
# url = "http://inventory.local/api/devices"

[pipeline]
pipeline_timeout_ms = 120000

[pipeline.discovery]
credential = "public"
poll_timeout_ms = 3000

[pipeline.synthesis]
fallback_enabled = false
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(&generate_example_config()).unwrap();
        assert_eq!(config.inventory, InventorySource::Arp);
        assert_eq!(config.recency_hours, 24);
        assert_eq!(config.liveness, LivenessMethod::Auto);
        assert_eq!(config.pipeline.discovery.credential, "public");
        assert!(!config.pipeline.synthesis.fallback_enabled);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = parse_config(
            r#"
            liveness = "tcp_connect"

            [inventory]
            kind = "http"
            url = "http://10.0.0.5/devices"

            [pipeline.probe]
            retries = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.liveness, LivenessMethod::TcpConnect);
        assert_eq!(
            config.inventory,
            InventorySource::Http {
                url: "http://10.0.0.5/devices".to_string(),
                timeout_secs: 10
            }
        );
        assert_eq!(config.pipeline.probe.retries, 3);
        assert_eq!(config.pipeline.probe.batch_delay_ms, 100);
        assert_eq!(config.recency_hours, DEFAULT_RECENCY_HOURS);
    }

    #[test]
    fn test_storage_dir_override() {
        let config = AgentConfig {
            storage_dir: Some(PathBuf::from("/srv/netmap")),
            ..AgentConfig::default()
        };
        assert_eq!(config.storage_dir(), PathBuf::from("/srv/netmap"));
        assert!(AgentConfig::default().storage_dir().ends_with("topologies"));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        assert!(parse_config("recency_hours = \"soon\"").is_err());
    }
}
