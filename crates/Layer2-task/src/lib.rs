//! # cmsync-task
//!
//! Task execution for CmSync.
//! Runs units of async work with bounded concurrency and a hard timeout.
//!
//! ## Features
//!
//! - Bounded worker pool plus bounded admission queue (rejects when full)
//! - Per-task timeout measured from the moment a worker picks the task up
//! - Cooperative cancellation through `CancellationToken`
//! - Errors and panics in work are reported as `Failed`, never propagated
//! - Exactly one terminal outcome per task

pub mod executor;
pub mod state;
pub mod task;

pub use executor::{AsyncTaskExecutor, ExecutorConfig, ExecutorStats, TaskHandle};
pub use state::TaskOutcome;
pub use task::{Task, TaskId};

/// Re-exported so callers can name the token handed to submitted work
pub use tokio_util::sync::CancellationToken;
