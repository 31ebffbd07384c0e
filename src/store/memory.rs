//! In-process checkpoint store
//!
//! Checkpoints are kept serialized, so everything that goes through this
//! store survives the same JSON round trip a durable backend would impose.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{Checkpoint, SessionId};
use crate::store::{CheckpointStore, StoreError};

#[derive(Default, Clone)]
pub struct MemoryCheckpointStore {
    entries: Arc<RwLock<HashMap<SessionId, Entry>>>,
}

struct Entry {
    json: String,
    terminal: bool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let json = serde_json::to_string(checkpoint)?;
        let mut entries = self.entries.write().await;

        // Versions only move forward
        if let Some(existing) = entries.get(checkpoint.session_id()) {
            let stored: Checkpoint = serde_json::from_str(&existing.json)?;
            if stored.version >= checkpoint.version {
                return Err(StoreError::StaleVersion {
                    session_id: checkpoint.session_id().to_string(),
                    stored: stored.version,
                    attempted: checkpoint.version,
                });
            }
        }

        entries.insert(
            checkpoint.session_id().to_string(),
            Entry {
                json,
                terminal: checkpoint.is_terminal(),
            },
        );
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Checkpoint, StoreError> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        Ok(serde_json::from_str(&entry.json)?)
    }

    async fn list_unresolved(&self) -> Result<Vec<SessionId>, StoreError> {
        let entries = self.entries.read().await;
        let mut ids: Vec<SessionId> = entries
            .iter()
            .filter(|(_, entry)| !entry.terminal)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
