//! Durable session records. Writes are best-effort from the orchestrator's
//! point of view: the progress emitter logs failures and moves on.

use async_trait::async_trait;
use autoapply_common::model::{ApplyLogEntry, Counters, Session, SessionStatus};
use thiserror::Error;

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &Session) -> Result<(), StoreError>;

    async fn create_log(&self, session_id: &str, entry: &ApplyLogEntry) -> Result<(), StoreError>;

    /// Carries the full counter set, so a later success reconciles any
    /// earlier lost write.
    async fn update_counters(&self, session_id: &str, counters: &Counters)
    -> Result<(), StoreError>;

    async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Rebuild a session from its durable record, for lookups after the
    /// in-memory snapshot is gone.
    async fn load_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;

    /// A user's sessions, newest first, at most `limit` of them.
    async fn list_sessions(&self, user_id: &str, limit: usize)
    -> Result<Vec<Session>, StoreError>;

    /// Remove a session together with its logs. Returns `false` if there was
    /// nothing to remove.
    async fn delete_session(&self, session_id: &str) -> Result<bool, StoreError>;
}

/// Newest first, truncated to `limit`.
pub(crate) fn newest_first(mut sessions: Vec<Session>, limit: usize) -> Vec<Session> {
    sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    sessions.truncate(limit);
    sessions
}
