//! File-backed topology store.
//!
//! Each topology is one JSON file in the storage directory. `index.json`
//! lists what is stored and which topology is last-active. Every write goes
//! to a temp file first and is renamed into place, so a failed save leaves
//! the previous state untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use netmap_core::error::PersistenceError;
use netmap_core::repository::TopologyRepository;
use netmap_core::topology::Topology;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    id: String,
    version: u32,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreIndex {
    last_active: Option<String>,
    #[serde(default)]
    entries: Vec<IndexEntry>,
}

#[derive(Debug)]
pub struct FileRepository {
    dir: PathBuf,
    /// Serializes index updates
    write_lock: Mutex<()>,
}

/// Ids become file names, so only accept plain tokens.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn read_error(path: &Path, e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Read(format!("{}: {}", path.display(), e))
}

impl FileRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn topology_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    async fn write_atomic(&self, path: &Path, content: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        Ok(())
    }

    async fn load_index(&self) -> Result<StoreIndex, PersistenceError> {
        let path = self.dir.join(INDEX_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| read_error(&path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreIndex::default()),
            Err(e) => Err(read_error(&path, e)),
        }
    }

    async fn store_index(&self, index: &StoreIndex) -> std::io::Result<()> {
        let content = serde_json::to_vec_pretty(index)?;
        self.write_atomic(&self.dir.join(INDEX_FILE), &content).await
    }

    async fn load_topology(&self, id: &str) -> Result<Option<Topology>, PersistenceError> {
        if !is_safe_id(id) {
            return Ok(None);
        }
        let path = self.topology_path(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| read_error(&path, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(read_error(&path, e)),
        }
    }
}

#[async_trait]
impl TopologyRepository for FileRepository {
    async fn save(&self, topology: &Topology) -> Result<(), PersistenceError> {
        let write_error = |message: String| PersistenceError::Write {
            id: topology.id.clone(),
            message,
        };
        if !is_safe_id(&topology.id) {
            return Err(write_error("id is not a valid file name".to_string()));
        }

        let _guard = self.write_lock.lock().await;
        let mut index = self.load_index().await?;

        let content = serde_json::to_vec_pretty(topology).map_err(|e| write_error(e.to_string()))?;
        let path = self.topology_path(&topology.id);
        self.write_atomic(&path, &content)
            .await
            .map_err(|e| write_error(e.to_string()))?;

        index.entries.retain(|e| e.id != topology.id);
        index.entries.push(IndexEntry {
            id: topology.id.clone(),
            version: topology.version,
            created_at: topology.created_at,
        });
        index.last_active = Some(topology.id.clone());

        if let Err(e) = self.store_index(&index).await {
            // Not visible until the index names it.
            let _ = tokio::fs::remove_file(&path).await;
            return Err(write_error(e.to_string()));
        }

        tracing::debug!(
            "Stored topology {} v{} in {:?}",
            topology.id,
            topology.version,
            self.dir
        );
        Ok(())
    }

    async fn get_last_active(&self) -> Result<Option<Topology>, PersistenceError> {
        let index = self.load_index().await?;
        match index.last_active {
            Some(id) => self.load_topology(&id).await,
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Topology>, PersistenceError> {
        let index = self.load_index().await?;
        if !index.entries.iter().any(|e| e.id == id) {
            return Ok(None);
        }
        self.load_topology(id).await
    }

    async fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
        let _guard = self.write_lock.lock().await;
        let mut index = self.load_index().await?;

        let before = index.entries.len();
        index.entries.retain(|e| e.id != id);
        if index.entries.len() == before {
            return Ok(false);
        }

        if index.last_active.as_deref() == Some(id) {
            index.last_active = index
                .entries
                .iter()
                .max_by_key(|e| e.created_at)
                .map(|e| e.id.clone());
        }

        self.store_index(&index)
            .await
            .map_err(|e| PersistenceError::Write {
                id: id.to_string(),
                message: e.to_string(),
            })?;

        if let Err(e) = tokio::fs::remove_file(self.topology_path(id)).await {
            tracing::warn!("Topology {} unlisted but its file remains: {}", id, e);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmap_core::DeviceRole;
    use netmap_core::topology::assembler::compute_stats;
    use netmap_core::topology::{ConfidenceLevel, LinkType, NodeMetrics, TopologyLink, TopologyNode, TopologyStats};

    fn topology(id: &str, version: u32, age_secs: i64) -> Topology {
        Topology {
            id: id.to_string(),
            version,
            nodes: Vec::new(),
            links: Vec::new(),
            stats: TopologyStats::default(),
            central_node_id: None,
            created_at: Utc::now() - chrono::Duration::seconds(age_secs),
            source: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileRepository::new(dir.path());
        assert!(repo.get_last_active().await.unwrap().is_none());

        repo.save(&topology("first", 1, 10)).await.unwrap();
        repo.save(&topology("second", 2, 0)).await.unwrap();

        // A fresh handle sees the same state.
        let reopened = FileRepository::new(dir.path());
        let last = reopened.get_last_active().await.unwrap().unwrap();
        assert_eq!(last.id, "second");
        assert_eq!(last.version, 2);
        assert_eq!(reopened.find_by_id("first").await.unwrap().unwrap().version, 1);
        assert!(reopened.find_by_id("missing").await.unwrap().is_none());
    }

    fn node(id: &str, ip: &str, role: DeviceRole) -> TopologyNode {
        TopologyNode {
            id: id.to_string(),
            ip: ip.to_string(),
            mac: None,
            hostname: Some(format!("{}.lan", id)),
            os_guess: None,
            vendor: None,
            role,
            confidence: 0.9,
            is_central: role == DeviceRole::Router,
            is_virtual: false,
            metrics: NodeMetrics {
                reachable: Some(true),
                response_time_ms: Some(1.25),
                ..NodeMetrics::default()
            },
            metadata: [("roleSource".to_string(), serde_json::json!("inventory"))]
                .into_iter()
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_round_trip_keeps_graph() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileRepository::new(dir.path());

        let nodes = vec![
            node("gw", "10.0.0.1", DeviceRole::Router),
            node("sw", "10.0.0.2", DeviceRole::Switch),
        ];
        let mut uplink = TopologyLink::new(
            LinkType::Assumed,
            "gw",
            "sw",
            ConfidenceLevel::Medium,
            "router uplink",
        );
        uplink.is_assumed = true;
        let links = vec![uplink];

        let mut original = topology("graph", 3, 0);
        original.stats = compute_stats(&nodes, &links);
        original.central_node_id = Some("gw".to_string());
        original.nodes = nodes;
        original.links = links;
        repo.save(&original).await.unwrap();

        let loaded = repo.find_by_id("graph").await.unwrap().unwrap();
        assert_eq!(loaded.nodes, original.nodes);
        assert_eq!(loaded.links, original.links);
        assert_eq!(loaded.stats.total_nodes, 2);
        assert_eq!(loaded.stats.total_links, 1);
        assert_eq!(loaded.stats.assumed_links, 1);
        assert!((loaded.stats.mean_link_confidence - original.stats.mean_link_confidence).abs() < 1e-9);
        assert_eq!(loaded.central_node().map(|n| n.id.as_str()), Some("gw"));
    }

    #[tokio::test]
    async fn test_delete_moves_last_active() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileRepository::new(dir.path());
        repo.save(&topology("old", 1, 100)).await.unwrap();
        repo.save(&topology("new", 2, 0)).await.unwrap();

        assert!(repo.delete("new").await.unwrap());
        assert!(!repo.delete("new").await.unwrap());
        assert_eq!(repo.get_last_active().await.unwrap().unwrap().id, "old");
        assert!(!dir.path().join("new.json").exists());
    }

    #[tokio::test]
    async fn test_rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileRepository::new(dir.path());

        assert!(repo.save(&topology("../escape", 1, 0)).await.is_err());
        assert!(repo.find_by_id("../index").await.unwrap().is_none());
        assert!(repo.get_last_active().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileRepository::new(dir.path());
        repo.save(&topology("good", 1, 0)).await.unwrap();

        // A directory squatting on the temp path makes the write fail.
        std::fs::create_dir(dir.path().join("blocked.json.tmp")).unwrap();
        assert!(repo.save(&topology("blocked", 2, 0)).await.is_err());

        assert_eq!(repo.get_last_active().await.unwrap().unwrap().id, "good");
        assert!(repo.find_by_id("blocked").await.unwrap().is_none());
    }

    #[test]
    fn test_safe_ids() {
        assert!(is_safe_id("3f2b9c1e-6a1d-4e0f-9b7a-2c8d4e5f6a7b"));
        assert!(!is_safe_id(""));
        assert!(!is_safe_id("a/b"));
        assert!(!is_safe_id(".."));
    }
}
