//! Task executors
//!
//! - `AsyncTaskExecutor` - bounded worker pool with admission limit and hard per-task timeout
//! - `TaskHandle` - future resolving to the task's single terminal outcome

mod bounded;

pub use bounded::{AsyncTaskExecutor, ExecutorConfig, ExecutorStats, TaskHandle};
