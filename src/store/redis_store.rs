//! Redis-backed checkpoint store
//!
//! Layout: the checkpoint JSON under `{prefix}:checkpoint:{id}` and the ids
//! of unresolved sessions in the set `{prefix}:unresolved`. Both are updated
//! in one MULTI/EXEC per save.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;

use crate::models::{Checkpoint, SessionId};
use crate::store::{CheckpointStore, StoreError};

pub const DEFAULT_PREFIX: &str = "setupflow";

#[derive(Clone)]
pub struct RedisCheckpointStore {
    conn: ConnectionManager,
    prefix: String,
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

impl RedisCheckpointStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_prefix(url, DEFAULT_PREFIX).await
    }

    pub async fn connect_with_prefix(url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(prefix = %prefix, "RedisCheckpointStore: connected");
        Ok(Self {
            conn,
            prefix: prefix.to_string(),
        })
    }

    fn checkpoint_key(&self, session_id: &str) -> String {
        format!("{}:checkpoint:{}", self.prefix, session_id)
    }

    fn unresolved_key(&self) -> String {
        format!("{}:unresolved", self.prefix)
    }
}

#[async_trait]
impl CheckpointStore for RedisCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let json = serde_json::to_string(checkpoint)?;
        let id = checkpoint.session_id();
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic().set(self.checkpoint_key(id), json).ignore();
        if checkpoint.is_terminal() {
            pipe.srem(self.unresolved_key(), id).ignore();
        } else {
            pipe.sadd(self.unresolved_key(), id).ignore();
        }

        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Checkpoint, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.checkpoint_key(session_id)).await?;
        let raw = raw.ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn list_unresolved(&self) -> Result<Vec<SessionId>, StoreError> {
        let mut conn = self.conn.clone();
        let mut ids: Vec<SessionId> = conn.smembers(self.unresolved_key()).await?;
        ids.sort();
        Ok(ids)
    }
}
