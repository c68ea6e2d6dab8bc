//! In-process task substrate: typed task units with soft/hard limits and retry
//! policies, chains of units, and a fixed-size worker pool that runs them.

mod activity;
mod backoff;
pub mod policy;
mod pool;
pub mod task;
mod unit;

pub use activity::{ActivityGuard, ActivityTracker};
pub use policy::{RetryPolicy, TaskPolicy};
pub use pool::TaskExecutor;
pub use task::{TaskContext, TaskError, TaskErrorReason, TaskKind};
pub use unit::{Job, JobContext, TaskFuture, TaskUnit};
