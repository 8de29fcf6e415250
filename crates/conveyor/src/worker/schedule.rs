//! Time-indexed retry schedule
//!
//! Workers park failed tasks here with a ready time instead of sleeping
//! through the backoff window; the poller drains due entries each tick.
//! The schedule is a min-heap keyed by ready time plus an id set, so the
//! poller can tell a task waiting out its backoff from one that needs
//! redelivery.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::task::Task;

struct ScheduledRetry {
    ready_at: Instant,
    task: Task,
}

impl PartialEq for ScheduledRetry {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.task.id == other.task.id
    }
}

impl Eq for ScheduledRetry {}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRetry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap pops the earliest ready time first
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.task.id.cmp(&self.task.id))
    }
}

#[derive(Default)]
struct Inner {
    heap: BinaryHeap<ScheduledRetry>,
    ids: HashSet<String>,
}

/// Pending retries indexed by ready time
#[derive(Default)]
pub struct RetrySchedule {
    inner: Mutex<Inner>,
}

impl RetrySchedule {
    /// Create an empty schedule
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a task until `delay` has elapsed.
    pub fn schedule(&self, task: Task, delay: Duration) {
        self.schedule_at(task, Instant::now() + delay);
    }

    /// Park a task until a specific ready time.
    pub fn schedule_at(&self, task: Task, ready_at: Instant) {
        let mut inner = self.inner.lock();
        inner.ids.insert(task.id.clone());
        inner.heap.push(ScheduledRetry { ready_at, task });
    }

    /// Whether a task id is still waiting out its backoff.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().ids.contains(id)
    }

    /// Remove and return every task whose ready time has passed.
    pub fn pop_due(&self, now: Instant) -> Vec<Task> {
        let mut inner = self.inner.lock();
        let mut due = vec![];
        while let Some(entry) = inner.heap.peek() {
            if entry.ready_at > now {
                break;
            }
            let entry = inner.heap.pop().expect("peeked entry");
            inner.ids.remove(&entry.task.id);
            due.push(entry.task);
        }
        due
    }

    /// Number of parked tasks
    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Check if the schedule is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
