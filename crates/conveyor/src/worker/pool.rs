//! Worker execution loop
//!
//! Each worker binds to one priority's ready queue for its entire lifetime
//! and drives the task lifecycle: claim, handler invocation under the
//! per-attempt timeout, then the terminal or retry transition. There is no
//! work stealing across priorities.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::queues::ReadyQueues;
use super::schedule::RetrySchedule;
use crate::engine::{HandlerContext, HandlerError, HandlerRegistry};
use crate::metrics::{EngineMetrics, TaskOutcome};
use crate::persistence::TaskStore;
use crate::reliability::RetryPolicy;
use crate::task::{Priority, Task};

pub(crate) struct Worker {
    id: String,
    priority: Priority,
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    queues: Arc<ReadyQueues>,
    schedule: Arc<RetrySchedule>,
    metrics: Arc<EngineMetrics>,
    retry_policy: RetryPolicy,
    task_timeout: Duration,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        priority: Priority,
        index: usize,
        store: Arc<dyn TaskStore>,
        registry: Arc<HandlerRegistry>,
        queues: Arc<ReadyQueues>,
        schedule: Arc<RetrySchedule>,
        metrics: Arc<EngineMetrics>,
        retry_policy: RetryPolicy,
        task_timeout: Duration,
    ) -> Self {
        Self {
            id: format!("worker-{priority}-{index}"),
            priority,
            store,
            registry,
            queues,
            schedule,
            metrics,
            retry_policy,
            task_timeout,
        }
    }

    /// Consume the bound priority queue until shutdown is signalled.
    ///
    /// Shutdown is observed at the channel receive: an in-flight handler
    /// always runs to completion and its result is persisted before the
    /// worker exits.
    pub(crate) async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        self.metrics.worker_started();
        info!(worker = %self.id, "worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => continue,
                task = self.queues.take(self.priority) => self.process_task(task).await,
            }
        }

        info!(worker = %self.id, "worker stopped");
        self.metrics.worker_exited();
    }

    async fn process_task(&self, mut task: Task) {
        let started = Instant::now();
        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            worker = %self.id,
            attempt = task.retry_count + 1,
            "processing task"
        );

        task.mark_started(&self.id);
        self.persist(&task).await;

        let Some(handler) = self.registry.get(&task.task_type) else {
            error!(task_id = %task.id, task_type = %task.task_type, "no handler for task type");
            task.mark_failed(format!("no handler for task type: {}", task.task_type));
            self.persist(&task).await;
            self.metrics.task_processed(&task.task_type, TaskOutcome::Failed);
            self.metrics.queue_size_dec(task.priority);
            return;
        };

        let ctx = HandlerContext::new(
            &task.id,
            task.retry_count + 1,
            task.max_retries + 1,
            &self.id,
        );
        let cancel = ctx.cancellation_handle();

        let result = match tokio::time::timeout(self.task_timeout, handler(ctx, task.clone())).await
        {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(HandlerError::timeout(self.task_timeout))
            }
        };

        let duration = started.elapsed();
        self.metrics.observe_duration(&task.task_type, duration);

        match result {
            Ok(()) => {
                task.mark_completed();
                self.persist(&task).await;
                self.metrics
                    .task_processed(&task.task_type, TaskOutcome::Completed);
                self.metrics.queue_size_dec(task.priority);
                info!(
                    task_id = %task.id,
                    duration_ms = duration.as_millis() as u64,
                    "task completed"
                );
            }
            Err(err) if err.retryable && task.can_retry() => {
                task.mark_retrying();
                self.persist(&task).await;
                self.metrics.task_retried(&task.task_type);

                let delay = self.retry_policy.delay_for_retry(task.retry_count);
                warn!(
                    task_id = %task.id,
                    retry_count = task.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "task failed, retry scheduled"
                );
                // The poller redelivers the task once the backoff elapses;
                // this worker is immediately free for other work.
                self.schedule.schedule(task, delay);
            }
            Err(err) => {
                error!(
                    task_id = %task.id,
                    retry_count = task.retry_count,
                    error = %err,
                    "task failed permanently"
                );
                task.mark_failed(err.message);
                self.persist(&task).await;
                self.metrics.task_processed(&task.task_type, TaskOutcome::Failed);
                self.metrics.queue_size_dec(task.priority);
            }
        }
    }

    async fn persist(&self, task: &Task) {
        if let Err(error) = self.store.update_task(task).await {
            error!(task_id = %task.id, %error, "failed to persist task state");
        }
    }
}
