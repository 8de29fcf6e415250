//! Worker-side machinery: per-priority ready queues, the store poller, the
//! retry schedule, and the worker execution loop.

mod poller;
mod pool;
mod queues;
mod schedule;

pub use poller::StorePoller;
pub use queues::{ReadyQueue, ReadyQueues};
pub use schedule::RetrySchedule;

pub(crate) use pool::Worker;
