//! Engine metrics hooks
//!
//! Labelled counters and gauges updated at the emission points of the
//! dispatch lifecycle. Exporter wiring is out of scope; observers pull a
//! [`MetricsSnapshot`] and feed it to whatever backend they use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::task::Priority;

/// Terminal outcome label for `tasks_processed_total`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    Failed,
}

/// Handler wall-clock duration aggregate for one task type
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DurationStats {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl DurationStats {
    fn record(&mut self, duration: Duration) {
        if self.count == 0 || duration < self.min {
            self.min = duration;
        }
        if duration > self.max {
            self.max = duration;
        }
        self.count += 1;
        self.total += duration;
    }

    /// Mean duration, zero when nothing was recorded
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

/// Counters and gauges for the dispatch engine
#[derive(Debug, Default)]
pub struct EngineMetrics {
    // tasks_submitted_total{type, priority}
    submitted: Mutex<HashMap<(String, Priority), u64>>,
    // tasks_processed_total{type, outcome}
    processed: Mutex<HashMap<(String, TaskOutcome), u64>>,
    // task_retries_total{type}
    retries: Mutex<HashMap<String, u64>>,
    // task_duration_seconds{type}
    durations: Mutex<HashMap<String, DurationStats>>,
    // queue_size{priority}: incremented at submit, decremented at terminal
    // transition, so recovered pre-seeded tasks can drive it negative
    queue_size: [AtomicI64; 4],
    workers_active: AtomicUsize,
}

impl EngineMetrics {
    /// Create a zeroed metrics set
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn task_submitted(&self, task_type: &str, priority: Priority) {
        *self
            .submitted
            .lock()
            .entry((task_type.to_string(), priority))
            .or_default() += 1;
    }

    pub(crate) fn task_processed(&self, task_type: &str, outcome: TaskOutcome) {
        *self
            .processed
            .lock()
            .entry((task_type.to_string(), outcome))
            .or_default() += 1;
    }

    pub(crate) fn task_retried(&self, task_type: &str) {
        *self.retries.lock().entry(task_type.to_string()).or_default() += 1;
    }

    pub(crate) fn observe_duration(&self, task_type: &str, duration: Duration) {
        self.durations
            .lock()
            .entry(task_type.to_string())
            .or_default()
            .record(duration);
    }

    pub(crate) fn queue_size_inc(&self, priority: Priority) {
        self.queue_size[priority.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn queue_size_dec(&self, priority: Priority) {
        self.queue_size[priority.index()].fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn worker_started(&self) {
        self.workers_active.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn worker_exited(&self) {
        self.workers_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// `tasks_submitted_total` for one (type, priority) pair
    pub fn submitted_total(&self, task_type: &str, priority: Priority) -> u64 {
        self.submitted
            .lock()
            .get(&(task_type.to_string(), priority))
            .copied()
            .unwrap_or(0)
    }

    /// `tasks_processed_total` for one (type, outcome) pair
    pub fn processed_total(&self, task_type: &str, outcome: TaskOutcome) -> u64 {
        self.processed
            .lock()
            .get(&(task_type.to_string(), outcome))
            .copied()
            .unwrap_or(0)
    }

    /// `task_retries_total` for one type
    pub fn retries_total(&self, task_type: &str) -> u64 {
        self.retries.lock().get(task_type).copied().unwrap_or(0)
    }

    /// `task_duration_seconds` aggregate for one type
    pub fn duration_stats(&self, task_type: &str) -> DurationStats {
        self.durations
            .lock()
            .get(task_type)
            .copied()
            .unwrap_or_default()
    }

    /// `queue_size` gauge for one priority
    pub fn queue_size(&self, priority: Priority) -> i64 {
        self.queue_size[priority.index()].load(Ordering::Relaxed)
    }

    /// `workers_active` gauge
    pub fn workers_active(&self) -> usize {
        self.workers_active.load(Ordering::Relaxed)
    }

    /// A point-in-time copy of every metric
    pub fn snapshot(&self) -> MetricsSnapshot {
        let submitted = self
            .submitted
            .lock()
            .iter()
            .map(|((task_type, priority), value)| SubmittedSample {
                task_type: task_type.clone(),
                priority: *priority,
                value: *value,
            })
            .collect();

        let processed = self
            .processed
            .lock()
            .iter()
            .map(|((task_type, outcome), value)| ProcessedSample {
                task_type: task_type.clone(),
                outcome: *outcome,
                value: *value,
            })
            .collect();

        let retries = self
            .retries
            .lock()
            .iter()
            .map(|(task_type, value)| RetrySample {
                task_type: task_type.clone(),
                value: *value,
            })
            .collect();

        let durations = self
            .durations
            .lock()
            .iter()
            .map(|(task_type, stats)| DurationSample {
                task_type: task_type.clone(),
                stats: *stats,
            })
            .collect();

        MetricsSnapshot {
            tasks_submitted: submitted,
            tasks_processed: processed,
            task_retries: retries,
            task_durations: durations,
            queue_size: Priority::ALL
                .into_iter()
                .map(|priority| QueueSizeSample {
                    priority,
                    value: self.queue_size(priority),
                })
                .collect(),
            workers_active: self.workers_active(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmittedSample {
    pub task_type: String,
    pub priority: Priority,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedSample {
    pub task_type: String,
    pub outcome: TaskOutcome,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrySample {
    pub task_type: String,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DurationSample {
    pub task_type: String,
    pub stats: DurationStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueSizeSample {
    pub priority: Priority,
    pub value: i64,
}

/// Point-in-time copy of all engine metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_submitted: Vec<SubmittedSample>,
    pub tasks_processed: Vec<ProcessedSample>,
    pub task_retries: Vec<RetrySample>,
    pub task_durations: Vec<DurationSample>,
    pub queue_size: Vec<QueueSizeSample>,
    pub workers_active: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labelled_counters() {
        let metrics = EngineMetrics::new();

        metrics.task_submitted("email", Priority::High);
        metrics.task_submitted("email", Priority::High);
        metrics.task_submitted("email", Priority::Low);
        metrics.task_processed("email", TaskOutcome::Completed);
        metrics.task_retried("email");

        assert_eq!(metrics.submitted_total("email", Priority::High), 2);
        assert_eq!(metrics.submitted_total("email", Priority::Low), 1);
        assert_eq!(metrics.submitted_total("other", Priority::Low), 0);
        assert_eq!(metrics.processed_total("email", TaskOutcome::Completed), 1);
        assert_eq!(metrics.processed_total("email", TaskOutcome::Failed), 0);
        assert_eq!(metrics.retries_total("email"), 1);
    }

    #[test]
    fn test_queue_size_gauge() {
        let metrics = EngineMetrics::new();

        metrics.queue_size_inc(Priority::High);
        metrics.queue_size_inc(Priority::High);
        metrics.queue_size_dec(Priority::High);

        assert_eq!(metrics.queue_size(Priority::High), 1);
        assert_eq!(metrics.queue_size(Priority::Low), 0);

        // Pre-seeded tasks are decremented without a matching increment.
        metrics.queue_size_dec(Priority::Low);
        assert_eq!(metrics.queue_size(Priority::Low), -1);
    }

    #[test]
    fn test_duration_stats() {
        let metrics = EngineMetrics::new();

        metrics.observe_duration("email", Duration::from_millis(10));
        metrics.observe_duration("email", Duration::from_millis(30));

        let stats = metrics.duration_stats("email");
        assert_eq!(stats.count, 2);
        assert_eq!(stats.min, Duration::from_millis(10));
        assert_eq!(stats.max, Duration::from_millis(30));
        assert_eq!(stats.mean(), Duration::from_millis(20));
    }

    #[test]
    fn test_workers_active_gauge() {
        let metrics = EngineMetrics::new();
        metrics.worker_started();
        metrics.worker_started();
        metrics.worker_exited();
        assert_eq!(metrics.workers_active(), 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = EngineMetrics::new();
        metrics.task_submitted("email", Priority::Critical);
        metrics.observe_duration("email", Duration::from_millis(5));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.tasks_submitted.len(), 1);
        assert_eq!(snapshot.queue_size.len(), 4);

        serde_json::to_string(&snapshot).unwrap();
    }
}
