//! Task entity and lifecycle transitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default retry budget for newly created tasks.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Task priority levels
///
/// Each priority level gets its own ready queue and its own slice of the
/// worker pool, so a backlog at one level cannot starve another.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// All priority levels, lowest first.
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Critical,
    ];

    /// Numeric rank (`Low = 0` .. `Critical = 3`).
    pub fn rank(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    /// Dense index into per-priority arrays.
    pub fn index(self) -> usize {
        self.rank() as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a task
///
/// Only the dispatch engine mutates status; handlers never touch it.
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Persisted, waiting to be dispatched
    Pending,
    /// Claimed by a worker, handler running
    Processing,
    /// Handler returned success
    Completed,
    /// Handler failed permanently or exhausted its retry budget
    Failed,
    /// Handler failed, another attempt is scheduled
    Retrying,
}

impl TaskStatus {
    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work to be executed
///
/// The store is the authoritative owner of a task; ready queues only carry
/// transient copies used as dispatch hints. The wire form ignores unknown
/// fields on read, and absent optional fields round-trip as absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Globally unique opaque id, assigned at creation
    pub id: String,

    /// Handler selector
    #[serde(rename = "type")]
    pub task_type: String,

    pub priority: Priority,

    pub status: TaskStatus,

    /// Opaque payload, passed through to the handler
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Retry budget; `retry_count` never exceeds it
    pub max_retries: u32,

    #[serde(default)]
    pub retry_count: u32,

    pub created_at: DateTime<Utc>,

    /// Set on the first transition to `Processing`; overwritten on retries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Set on transition to `Completed` or `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Last handler error message, populated on `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Identifier of the last worker to claim the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

impl Task {
    /// Create a new `Pending` task with a fresh id and the default retry
    /// budget.
    pub fn new(task_type: impl Into<String>, priority: Priority, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            task_type: task_type.into(),
            priority,
            status: TaskStatus::Pending,
            payload,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_count: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            worker_id: None,
        }
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Whether another retry attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Claim the task for execution.
    pub fn mark_started(&mut self, worker_id: &str) {
        self.status = TaskStatus::Processing;
        self.started_at = Some(Utc::now());
        self.worker_id = Some(worker_id.to_string());
    }

    /// Record successful completion.
    pub fn mark_completed(&mut self) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Record permanent failure.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Schedule another attempt. Increments `retry_count` exactly once.
    pub fn mark_retrying(&mut self) {
        self.status = TaskStatus::Retrying;
        self.retry_count += 1;
    }

    /// Secondary-index sort key: higher priority first, newer first within a
    /// priority when the index is scanned in descending order.
    pub fn scheduling_score(&self) -> i64 {
        self.priority.rank() * 1_000_000 + self.created_at.timestamp()
    }
}
