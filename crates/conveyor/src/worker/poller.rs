//! Store poller
//!
//! Periodic background loop that refills the ready queues from the store.
//! The fast in-memory handoff is best-effort; this poll is the correctness
//! path that rediscovers tasks dropped from a full queue, submitted before
//! a crash, or returned by the stale-processing reaper.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, warn};

use super::queues::ReadyQueues;
use super::schedule::RetrySchedule;
use crate::persistence::TaskStore;
use crate::task::TaskStatus;

/// Background poller feeding the ready queues from the store
pub struct StorePoller {
    store: Arc<dyn TaskStore>,
    queues: Arc<ReadyQueues>,
    schedule: Arc<RetrySchedule>,
    interval: Duration,
    batch_pending: usize,
    batch_retrying: usize,
    shutdown_rx: watch::Receiver<bool>,
}

impl StorePoller {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        queues: Arc<ReadyQueues>,
        schedule: Arc<RetrySchedule>,
        interval: Duration,
        batch_pending: usize,
        batch_retrying: usize,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            queues,
            schedule,
            interval,
            batch_pending,
            batch_retrying,
            shutdown_rx,
        }
    }

    /// Run until shutdown is signalled.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = self.shutdown_rx.changed() => {
                    debug!("poller: shutdown requested");
                    break;
                }
            }
        }

        debug!("poller exited");
    }

    /// One poll cycle. Never mutates task state; only suggests work.
    pub(crate) async fn tick(&self) {
        // Retries whose backoff has elapsed go first. A still-full queue
        // pushes the entry back for the next tick; the backoff is never
        // shortened by redelivery.
        let now = Instant::now();
        for task in self.schedule.pop_due(now) {
            if let Err(task) = self.queues.try_offer(task) {
                self.schedule.schedule_at(task, now);
            }
        }

        self.refill(TaskStatus::Pending, self.batch_pending).await;
        self.refill(TaskStatus::Retrying, self.batch_retrying).await;
    }

    async fn refill(&self, status: TaskStatus, batch: usize) {
        let tasks = match self.store.get_tasks_by_status(status, batch).await {
            Ok(tasks) => tasks,
            Err(error) => {
                warn!(%status, %error, "poll scan failed, skipping tick");
                return;
            }
        };

        for task in tasks {
            // Still waiting out its backoff window.
            if status == TaskStatus::Retrying && self.schedule.contains(&task.id) {
                continue;
            }
            if self.queues.try_offer(task).is_err() {
                // Queue full: stop and wait for the next tick.
                break;
            }
        }
    }
}
