//! TaskStore trait definition

use std::time::Duration;

use async_trait::async_trait;

use crate::task::{Task, TaskStatus};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Task not found
    #[error("task not found: {0}")]
    NotFound(String),

    /// Transient backend I/O failure
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable task repository
///
/// The store is the source of truth for task state. It keeps the primary
/// record keyed by id plus a secondary index over tasks by status, ordered
/// by scheduling score (see [`Task::scheduling_score`]). Implementations
/// must be thread-safe and support concurrent access.
///
/// Any backing technology is acceptable if the contract is met; a typical
/// backend is a key → blob map for task bodies plus one sorted set per
/// status keyed by the score.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Persist a task under its id and index it under its current status.
    /// Idempotent by id.
    async fn save_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Fetch a task by id.
    async fn get_task(&self, id: &str) -> Result<Task, StoreError>;

    /// Persist new task state. If the status changed, the id moves between
    /// status index buckets atomically: no status query may observe the same
    /// id in two buckets.
    async fn update_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Remove a task from the primary record and any status index.
    /// Idempotent.
    async fn delete_task(&self, id: &str) -> Result<(), StoreError>;

    /// Return up to `limit` tasks with the given status, ordered by
    /// descending scheduling score: higher priority first, and newer first
    /// within a priority.
    async fn get_tasks_by_status(
        &self,
        status: TaskStatus,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError>;

    /// Return `Processing` tasks whose attempt started more than `threshold`
    /// ago to `Pending`, clearing the worker claim, and report their ids.
    /// Recovers tasks orphaned by a worker process that died mid-handler.
    ///
    /// Optional; the default implementation reclaims nothing.
    async fn reclaim_stale(&self, _threshold: Duration) -> Result<Vec<String>, StoreError> {
        Ok(vec![])
    }
}
