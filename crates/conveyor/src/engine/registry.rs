//! Handler registry
//!
//! Maps task types to handler functions. Read-mostly: lookups happen on
//! every dispatch, writes normally only during startup, but registration
//! at any time is safe and visible to subsequent lookups.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::info;

use super::handler::{HandlerContext, HandlerResult, TaskHandler};
use crate::task::Task;

/// Registry of task handlers keyed by task type
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, TaskHandler>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a task type
    ///
    /// Re-registering a type replaces the prior handler; only subsequent
    /// invocations see the replacement.
    pub fn register<F, Fut>(&self, task_type: &str, handler: F)
    where
        F: Fn(HandlerContext, Task) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: TaskHandler = Arc::new(move |ctx, task| Box::pin(handler(ctx, task)));
        self.handlers
            .write()
            .unwrap()
            .insert(task_type.to_string(), handler);
        info!(task_type, "registered task handler");
    }

    /// Look up the handler for a task type
    pub fn get(&self, task_type: &str) -> Option<TaskHandler> {
        self.handlers.read().unwrap().get(task_type).cloned()
    }

    /// Check if a task type is registered
    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.read().unwrap().contains_key(task_type)
    }

    /// Number of registered task types
    pub fn len(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.handlers.read().unwrap().is_empty()
    }

    /// All registered task type names
    pub fn task_types(&self) -> Vec<String> {
        self.handlers.read().unwrap().keys().cloned().collect()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}
