//! Topology persistence interface
//!
//! A save is all-or-nothing: either the whole topology (nodes, links, stats)
//! becomes visible and last-active, or nothing changes.

use crate::error::PersistenceError;
use crate::topology::Topology;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait TopologyRepository: Send + Sync {
    async fn save(&self, topology: &Topology) -> Result<(), PersistenceError>;

    async fn get_last_active(&self) -> Result<Option<Topology>, PersistenceError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Topology>, PersistenceError>;

    /// `true` if a topology was removed.
    async fn delete(&self, id: &str) -> Result<bool, PersistenceError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    topologies: HashMap<String, Topology>,
    last_active: Option<String>,
}

/// Process-local repository.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: RwLock<MemoryState>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.topologies.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TopologyRepository for InMemoryRepository {
    async fn save(&self, topology: &Topology) -> Result<(), PersistenceError> {
        let mut state = self.state.write().await;
        state
            .topologies
            .insert(topology.id.clone(), topology.clone());
        state.last_active = Some(topology.id.clone());
        Ok(())
    }

    async fn get_last_active(&self) -> Result<Option<Topology>, PersistenceError> {
        let state = self.state.read().await;
        Ok(state
            .last_active
            .as_ref()
            .and_then(|id| state.topologies.get(id))
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Topology>, PersistenceError> {
        Ok(self.state.read().await.topologies.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> Result<bool, PersistenceError> {
        let mut state = self.state.write().await;
        if state.topologies.remove(id).is_none() {
            return Ok(false);
        }
        if state.last_active.as_deref() == Some(id) {
            state.last_active = state
                .topologies
                .values()
                .max_by_key(|t| t.created_at)
                .map(|t| t.id.clone());
        }
        Ok(true)
    }
}
