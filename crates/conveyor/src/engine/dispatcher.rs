//! Dispatcher facade
//!
//! Public surface of the dispatch engine: submit, lookup, stats, start and
//! shutdown. Composes the store, the handler registry, the per-priority
//! ready queues, the worker pool, the store poller and the stale-processing
//! reaper.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::handler::{HandlerContext, HandlerResult};
use super::registry::HandlerRegistry;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::persistence::{StoreError, TaskStore};
use crate::reliability::RetryPolicy;
use crate::task::{Priority, Task, TaskStatus};
use crate::worker::{ReadyQueues, RetrySchedule, StorePoller, Worker};

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Workers spawned per priority level
    pub workers_per_priority: usize,

    /// Ready-queue capacity per priority
    pub queue_capacity: usize,

    /// Store poll period
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Per-attempt handler timeout
    #[serde(with = "duration_millis")]
    pub task_timeout: Duration,

    /// Pending tasks fetched per poll tick
    pub poll_batch_pending: usize,

    /// Retrying tasks fetched per poll tick
    pub poll_batch_retrying: usize,

    /// Per-status scan limit used by `stats`
    pub stats_scan_limit: usize,

    /// Backoff policy for retry attempts
    pub retry_policy: RetryPolicy,

    /// Whether the stale-processing reaper runs
    pub reclaim_stale: bool,

    /// Reaper period
    #[serde(with = "duration_millis")]
    pub stale_reclaim_interval: Duration,

    /// Age at which a `Processing` task counts as orphaned. Keep this above
    /// `task_timeout`, or live attempts get reclaimed mid-flight.
    #[serde(with = "duration_millis")]
    pub stale_threshold: Duration,

    /// Graceful shutdown drain limit
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers_per_priority: 3,
            queue_capacity: 100,
            poll_interval: Duration::from_secs(1),
            task_timeout: Duration::from_secs(300),
            poll_batch_pending: 50,
            poll_batch_retrying: 20,
            stats_scan_limit: 1000,
            retry_policy: RetryPolicy::quadratic(),
            reclaim_stale: true,
            stale_reclaim_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatcherConfig {
    /// Create a configuration with the defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of workers per priority level
    pub fn with_workers_per_priority(mut self, workers: usize) -> Self {
        self.workers_per_priority = workers.max(1);
        self
    }

    /// Set the per-priority ready-queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the store poll period
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-attempt handler timeout
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Set the retry backoff policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Enable or disable the stale-processing reaper
    pub fn with_reclaim_stale(mut self, enabled: bool) -> Self {
        self.reclaim_stale = enabled;
        self
    }

    /// Set the reaper period and staleness threshold
    pub fn with_stale_reclaim(mut self, interval: Duration, threshold: Duration) -> Self {
        self.stale_reclaim_interval = interval;
        self.stale_threshold = threshold;
        self
    }

    /// Set the graceful shutdown drain limit
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Dispatcher lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherStatus {
    /// Not started, or fully stopped
    Stopped,
    /// Workers, poller and reaper are running
    Running,
    /// Shutdown signalled, draining in-flight tasks
    Draining,
}

/// Dispatcher errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Task rejected at submission
    #[error("invalid task: {0}")]
    Validation(String),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The dispatcher was already started
    #[error("dispatcher is already running")]
    AlreadyRunning,

    /// Graceful shutdown exceeded its drain limit
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// Best-effort counts of tasks per lifecycle state
///
/// Built from four independent status scans, so a task transitioning during
/// the scan may be counted twice or missed; acceptable for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// The dispatch engine
///
/// # Example
///
/// ```ignore
/// use conveyor::prelude::*;
///
/// let store = Arc::new(InMemoryTaskStore::new());
/// let dispatcher = Dispatcher::new(store, DispatcherConfig::default());
///
/// dispatcher.register_handler("email", |_ctx, task| async move {
///     send_email(&task.payload).await.map_err(HandlerError::retryable)
/// });
///
/// dispatcher.start().await?;
/// let id = dispatcher
///     .submit(Task::new("email", Priority::High, json!({"to": "a@b.c"})))
///     .await?;
/// // ...
/// dispatcher.shutdown().await?;
/// ```
pub struct Dispatcher {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    queues: Arc<ReadyQueues>,
    schedule: Arc<RetrySchedule>,
    metrics: Arc<EngineMetrics>,
    config: DispatcherConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    status: RwLock<DispatcherStatus>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create a dispatcher over the given store
    pub fn new(store: Arc<dyn TaskStore>, config: DispatcherConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            store,
            registry: Arc::new(HandlerRegistry::new()),
            queues: Arc::new(ReadyQueues::new(config.queue_capacity)),
            schedule: Arc::new(RetrySchedule::new()),
            metrics: Arc::new(EngineMetrics::new()),
            config,
            shutdown_tx,
            shutdown_rx,
            status: RwLock::new(DispatcherStatus::Stopped),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a handler for a task type; see [`HandlerRegistry::register`].
    pub fn register_handler<F, Fut>(&self, task_type: &str, handler: F)
    where
        F: Fn(HandlerContext, Task) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        self.registry.register(task_type, handler);
    }

    /// Current lifecycle state
    pub fn status(&self) -> DispatcherStatus {
        *self.status.read().unwrap()
    }

    /// Engine metrics
    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Point-in-time copy of every engine metric
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Submit a task for execution
    ///
    /// The task is persisted as `Pending` before this returns; persistence
    /// failure is the only fatal outcome. The fast-path enqueue is
    /// best-effort: on a full queue the poller delivers the task instead.
    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    pub async fn submit(&self, task: Task) -> Result<String, DispatchError> {
        if task.task_type.is_empty() {
            return Err(DispatchError::Validation(
                "task type must not be empty".to_string(),
            ));
        }

        self.store.save_task(&task).await?;

        self.metrics.task_submitted(&task.task_type, task.priority);
        self.metrics.queue_size_inc(task.priority);
        info!(priority = %task.priority, "task submitted");

        let id = task.id.clone();
        if self.queues.try_offer(task).is_err() {
            debug!(task_id = %id, "ready queue full, deferring to poller");
        }

        Ok(id)
    }

    /// Fetch a task by id
    pub async fn get_task(&self, id: &str) -> Result<Task, DispatchError> {
        Ok(self.store.get_task(id).await?)
    }

    /// Best-effort per-status task counts
    pub async fn stats(&self) -> Result<QueueStats, DispatchError> {
        let limit = self.config.stats_scan_limit;
        let count = |status| async move {
            Ok::<_, DispatchError>(self.store.get_tasks_by_status(status, limit).await?.len())
        };

        Ok(QueueStats {
            pending: count(TaskStatus::Pending).await?,
            processing: count(TaskStatus::Processing).await?,
            completed: count(TaskStatus::Completed).await?,
            failed: count(TaskStatus::Failed).await?,
        })
    }

    /// Start the engine: `workers_per_priority` workers per priority level,
    /// the store poller, and (if enabled) the stale-processing reaper.
    ///
    /// Returns promptly; fails with [`DispatchError::AlreadyRunning`] unless
    /// the dispatcher is stopped.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), DispatchError> {
        {
            let mut status = self.status.write().unwrap();
            if *status != DispatcherStatus::Stopped {
                return Err(DispatchError::AlreadyRunning);
            }
            *status = DispatcherStatus::Running;
        }

        info!(
            workers_per_priority = self.config.workers_per_priority,
            queue_capacity = self.config.queue_capacity,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "starting dispatcher"
        );

        // A restart after a clean shutdown reuses the watch channel.
        self.shutdown_tx.send_replace(false);

        let mut handles = Vec::new();

        for priority in Priority::ALL {
            for index in 0..self.config.workers_per_priority {
                let worker = Worker::new(
                    priority,
                    index,
                    Arc::clone(&self.store),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.queues),
                    Arc::clone(&self.schedule),
                    Arc::clone(&self.metrics),
                    self.config.retry_policy.clone(),
                    self.config.task_timeout,
                );
                handles.push(tokio::spawn(worker.run(self.shutdown_rx.clone())));
            }
        }

        let poller = StorePoller::new(
            Arc::clone(&self.store),
            Arc::clone(&self.queues),
            Arc::clone(&self.schedule),
            self.config.poll_interval,
            self.config.poll_batch_pending,
            self.config.poll_batch_retrying,
            self.shutdown_rx.clone(),
        );
        handles.push(tokio::spawn(poller.run()));

        if self.config.reclaim_stale {
            handles.push(tokio::spawn(reclaim_loop(
                Arc::clone(&self.store),
                self.config.stale_reclaim_interval,
                self.config.stale_threshold,
                self.shutdown_rx.clone(),
            )));
        }

        *self.handles.lock().unwrap() = handles;
        Ok(())
    }

    /// Gracefully stop the engine
    ///
    /// Signals shutdown, then waits for workers to drain: an in-flight
    /// handler runs to completion and its result is persisted before the
    /// worker exits. Tasks still buffered in ready queues are not lost:
    /// they remain `Pending`/`Retrying` in the store and are rediscovered
    /// by the poller on the next start.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<(), DispatchError> {
        {
            let mut status = self.status.write().unwrap();
            if *status == DispatcherStatus::Stopped {
                return Ok(());
            }
            *status = DispatcherStatus::Draining;
        }

        info!("initiating graceful shutdown");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        let drain = async {
            for handle in handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, drain).await {
            Ok(()) => {
                *self.status.write().unwrap() = DispatcherStatus::Stopped;
                info!("dispatcher stopped");
                Ok(())
            }
            Err(_) => {
                warn!("shutdown drain exceeded its limit");
                Err(DispatchError::ShutdownTimeout)
            }
        }
    }
}

/// Periodically return orphaned `Processing` tasks to `Pending`.
///
/// Recovered tasks re-enter execution through the poller's pending scan.
async fn reclaim_loop(
    store: Arc<dyn TaskStore>,
    interval: Duration,
    threshold: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.reclaim_stale(threshold).await {
                    Ok(ids) if !ids.is_empty() => {
                        info!(count = ids.len(), "reclaimed stale processing tasks");
                    }
                    Ok(_) => {}
                    Err(error) => error!(%error, "stale task reclaim failed"),
                }
            }
            _ = shutdown_rx.changed() => {
                debug!("reaper: shutdown requested");
                break;
            }
        }
    }

    debug!("reaper exited");
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
