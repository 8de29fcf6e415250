//! In-memory implementation of TaskStore

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::store::{StoreError, TaskStore};
use crate::task::{Task, TaskStatus};

/// Primary record map plus one ordered index per status.
///
/// Index entries are `(scheduling_score, id)` tuples; scanning the set in
/// reverse yields descending score order. Both maps are mutated under a
/// single write guard, which gives `update_task` its atomic index move.
#[derive(Default)]
struct Inner {
    tasks: HashMap<String, Task>,
    by_status: HashMap<TaskStatus, BTreeSet<(i64, String)>>,
}

impl Inner {
    fn index_insert(&mut self, task: &Task) {
        self.by_status
            .entry(task.status)
            .or_default()
            .insert((task.scheduling_score(), task.id.clone()));
    }

    fn index_remove(&mut self, task: &Task) {
        if let Some(bucket) = self.by_status.get_mut(&task.status) {
            bucket.remove(&(task.scheduling_score(), task.id.clone()));
        }
    }

    fn upsert(&mut self, task: &Task) {
        if let Some(previous) = self.tasks.get(&task.id).cloned() {
            self.index_remove(&previous);
        }
        self.index_insert(task);
        self.tasks.insert(task.id.clone(), task.clone());
    }
}

/// In-memory implementation of [`TaskStore`]
///
/// Intended for tests and single-process deployments. It provides the same
/// semantics a sorted-set-per-status backend provides, including the
/// descending scheduling-score order of [`TaskStore::get_tasks_by_status`].
///
/// # Example
///
/// ```
/// use conveyor::persistence::InMemoryTaskStore;
///
/// let store = InMemoryTaskStore::new();
/// ```
#[derive(Default)]
pub struct InMemoryTaskStore {
    inner: RwLock<Inner>,
}

impl InMemoryTaskStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of tasks, any status
    pub fn task_count(&self) -> usize {
        self.inner.read().tasks.len()
    }

    /// Number of tasks with the given status
    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.inner
            .read()
            .by_status
            .get(&status)
            .map_or(0, |bucket| bucket.len())
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.tasks.clear();
        inner.by_status.clear();
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        self.inner.write().upsert(task);
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Task, StoreError> {
        self.inner
            .read()
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        self.inner.write().upsert(task);
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if let Some(task) = inner.tasks.remove(id) {
            inner.index_remove(&task);
        }
        Ok(())
    }

    async fn get_tasks_by_status(
        &self,
        status: TaskStatus,
        limit: usize,
    ) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.read();
        let Some(bucket) = inner.by_status.get(&status) else {
            return Ok(vec![]);
        };

        Ok(bucket
            .iter()
            .rev()
            .take(limit)
            .filter_map(|(_, id)| inner.tasks.get(id).cloned())
            .collect())
    }

    async fn reclaim_stale(&self, threshold: Duration) -> Result<Vec<String>, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut inner = self.inner.write();
        let stale: Vec<String> = inner
            .tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::Processing
                    && t.started_at.is_some_and(|started| started < cutoff)
            })
            .map(|t| t.id.clone())
            .collect();

        for id in &stale {
            let mut task = inner.tasks[id].clone();
            inner.index_remove(&task);
            task.status = TaskStatus::Pending;
            task.worker_id = None;
            inner.index_insert(&task);
            inner.tasks.insert(id.clone(), task);
        }

        Ok(stale)
    }
}
