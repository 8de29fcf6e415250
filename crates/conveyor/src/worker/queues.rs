//! Per-priority ready queues
//!
//! A bounded in-memory handoff buffer between producers (submit, poller)
//! and workers. The queue is a latency-reducing fast path only: dropping an
//! entry is never a correctness failure, because the task stays `Pending`
//! or `Retrying` in the store and the poller rediscovers it.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::task::{Priority, Task};

struct QueueState {
    buf: VecDeque<Task>,
    // ids currently buffered, so repeated poll ticks don't double-deliver
    ids: HashSet<String>,
}

/// One bounded handoff queue
///
/// Non-blocking producer (`try_offer` drops on full), blocking consumer
/// (`take` awaits work). No lock is held across an await point.
pub struct ReadyQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl ReadyQueue {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                buf: VecDeque::with_capacity(capacity),
                ids: HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Attempt a non-blocking enqueue. Returns the task back on a full
    /// queue; offering an id that is already buffered is a no-op success.
    pub fn try_offer(&self, task: Task) -> Result<(), Task> {
        {
            let mut state = self.state.lock();
            if state.ids.contains(&task.id) {
                return Ok(());
            }
            if state.buf.len() >= self.capacity {
                return Err(task);
            }
            state.ids.insert(task.id.clone());
            state.buf.push_back(task);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for and take the next task.
    pub async fn take(&self) -> Task {
        loop {
            let popped = {
                let mut state = self.state.lock();
                let task = state.buf.pop_front();
                if let Some(ref task) = task {
                    state.ids.remove(&task.id);
                }
                task
            };
            if let Some(task) = popped {
                return task;
            }
            self.notify.notified().await;
        }
    }

    /// Number of buffered tasks
    pub fn len(&self) -> usize {
        self.state.lock().buf.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One [`ReadyQueue`] per priority level
///
/// There is no cross-priority spillover: a full `High` queue never causes a
/// task to land in `Medium`.
pub struct ReadyQueues {
    queues: [ReadyQueue; 4],
}

impl ReadyQueues {
    /// Create the queue set with the given per-priority capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: [
                ReadyQueue::new(capacity),
                ReadyQueue::new(capacity),
                ReadyQueue::new(capacity),
                ReadyQueue::new(capacity),
            ],
        }
    }

    /// The queue serving one priority level
    pub fn get(&self, priority: Priority) -> &ReadyQueue {
        &self.queues[priority.index()]
    }

    /// Offer a task to its priority's queue; see [`ReadyQueue::try_offer`].
    pub fn try_offer(&self, task: Task) -> Result<(), Task> {
        self.get(task.priority).try_offer(task)
    }

    /// Wait for and take the next task of one priority.
    pub async fn take(&self, priority: Priority) -> Task {
        self.get(priority).take().await
    }

    /// Buffered task count for one priority
    pub fn len(&self, priority: Priority) -> usize {
        self.get(priority).len()
    }
}
