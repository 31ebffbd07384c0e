//! Checkpoint persistence
//!
//! The latest checkpoint per session is the only source of truth on restart.
//! Each session's driver task is the sole writer of its checkpoints.

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Checkpoint, SessionId};

pub use self::memory::MemoryCheckpointStore;
pub use self::redis_store::RedisCheckpointStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
    #[error("no checkpoint for session {0}")]
    NotFound(String),
    #[error("checkpoint encoding failed: {0}")]
    Encoding(String),
    #[error("stale checkpoint for session {session_id}: version {attempted} is not newer than stored {stored}")]
    StaleVersion {
        session_id: String,
        stored: u64,
        attempted: u64,
    },
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Encoding(e.to_string())
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `checkpoint` as the latest for its session. Returns only once
    /// the write is durable.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    async fn load(&self, session_id: &str) -> Result<Checkpoint, StoreError>;

    /// Sessions whose latest checkpoint is not terminal, sorted by id
    async fn list_unresolved(&self) -> Result<Vec<SessionId>, StoreError>;
}
