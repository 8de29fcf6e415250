//! Dispatch engine: handler contract, handler registry, and the public
//! dispatcher facade.

mod dispatcher;
mod handler;
mod registry;

pub use dispatcher::{DispatchError, Dispatcher, DispatcherConfig, DispatcherStatus, QueueStats};
pub use handler::{CancellationHandle, HandlerContext, HandlerError, HandlerResult, TaskHandler};
pub use registry::HandlerRegistry;
