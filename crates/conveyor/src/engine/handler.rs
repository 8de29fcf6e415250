//! Handler invocation contract

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Error returned by a task handler
///
/// Handler failures are transient by default and drive the retry branch of
/// the lifecycle. Non-retryable errors fail the task immediately regardless
/// of its remaining retry budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandlerError {
    /// Human-readable error message, recorded on the task when it fails
    pub message: String,

    /// Whether the failure should consume a retry attempt
    pub retryable: bool,
}

impl HandlerError {
    /// Create a retryable (transient) error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable (permanent) error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    /// A per-attempt timeout. Retryable, with the cause in the message.
    pub fn timeout(limit: Duration) -> Self {
        Self::retryable(format!("handler timed out after {limit:?}"))
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Result of a handler invocation
pub type HandlerResult = Result<(), HandlerError>;

/// Type-erased task handler function
pub type TaskHandler = Arc<
    dyn Fn(HandlerContext, Task) -> Pin<Box<dyn Future<Output = HandlerResult> + Send>>
        + Send
        + Sync,
>;

/// Context passed to handlers for each execution attempt
///
/// Carries attempt metadata and a cooperative cancellation flag. The worker
/// arms the flag when the per-attempt timeout fires; handlers that observe
/// it can stop early, handlers that ignore it are dropped at the timeout
/// boundary anyway.
///
/// # Example
///
/// ```ignore
/// dispatcher.register_handler("resize", |ctx, task| async move {
///     for chunk in chunks(&task.payload) {
///         if ctx.is_cancelled() {
///             return Err(HandlerError::retryable("cancelled"));
///         }
///         process(chunk).await?;
///     }
///     Ok(())
/// });
/// ```
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Id of the task being executed
    pub task_id: String,

    /// Current attempt number (1-based; attempts = 1 + retries)
    pub attempt: u32,

    /// Maximum attempts allowed for the task
    pub max_attempts: u32,

    /// Identifier of the executing worker
    pub worker_id: String,

    cancelled: Arc<AtomicBool>,
}

impl HandlerContext {
    /// Create a context for one execution attempt
    pub fn new(
        task_id: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            attempt,
            max_attempts,
            worker_id: worker_id.into(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a handle that can cancel this attempt
    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle {
            cancelled: self.cancelled.clone(),
        }
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Resolve when cancellation is requested
    ///
    /// Useful in `select!` patterns inside handlers.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Check if this is the final attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Handle to cancel a handler attempt
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}
