//! # Conveyor
//!
//! A priority-aware, durable asynchronous task dispatch engine.
//!
//! ## Features
//!
//! - **Durable lifecycle**: every state transition is persisted to a
//!   pluggable [`persistence::TaskStore`] before anything else happens
//! - **Strict priority dispatch**: four priority levels, each with its own
//!   bounded ready queue and dedicated workers, so a backlog at one level
//!   cannot starve another
//! - **Bounded retries**: quadratic backoff via a time-indexed retry
//!   schedule that never parks a worker
//! - **Dual delivery path**: a best-effort in-memory handoff for latency,
//!   backed by a periodic store poll for crash and overflow recovery
//! - **Clean shutdown**: in-flight handlers run to completion and their
//!   results are persisted before workers exit
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                           │
//! │        (submit / get_task / stats / start / shutdown)        │
//! └──────────────────────────────────────────────────────────────┘
//!        │ persist                          │ best-effort offer
//!        ▼                                  ▼
//! ┌──────────────────┐   poll    ┌──────────────────────────────┐
//! │    TaskStore     │──────────►│   ReadyQueues (per priority) │
//! │ (source of truth)│           └──────────────────────────────┘
//! └──────────────────┘                      │ take
//!        ▲                                  ▼
//!        │ transitions           ┌──────────────────────────────┐
//!        └───────────────────────│  Workers (per priority)      │
//!                                │  handler → completed/retry   │
//!                                └──────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use conveyor::prelude::*;
//!
//! let store = Arc::new(InMemoryTaskStore::new());
//! let dispatcher = Dispatcher::new(store, DispatcherConfig::default());
//!
//! dispatcher.register_handler("email", |_ctx, task| async move {
//!     send(&task.payload).await.map_err(HandlerError::retryable)
//! });
//!
//! dispatcher.start().await?;
//! let id = dispatcher
//!     .submit(Task::new("email", Priority::High, serde_json::json!({"to": "a@b.c"})))
//!     .await?;
//! ```

pub mod engine;
pub mod metrics;
pub mod persistence;
pub mod reliability;
pub mod task;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::engine::{
        DispatchError, Dispatcher, DispatcherConfig, DispatcherStatus, HandlerContext,
        HandlerError, HandlerResult, QueueStats,
    };
    pub use crate::metrics::{MetricsSnapshot, TaskOutcome};
    pub use crate::persistence::{InMemoryTaskStore, StoreError, TaskStore};
    pub use crate::reliability::RetryPolicy;
    pub use crate::task::{Priority, Task, TaskStatus};
}

// Re-export key types at crate root
pub use engine::{
    DispatchError, Dispatcher, DispatcherConfig, DispatcherStatus, HandlerContext, HandlerError,
    HandlerRegistry, HandlerResult, QueueStats, TaskHandler,
};
pub use metrics::{EngineMetrics, MetricsSnapshot, TaskOutcome};
pub use persistence::{InMemoryTaskStore, StoreError, TaskStore};
pub use reliability::RetryPolicy;
pub use task::{Priority, Task, TaskStatus};
