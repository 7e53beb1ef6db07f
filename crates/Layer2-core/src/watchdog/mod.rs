//! Watchdog
//!
//! - `scheduler`: periodic enumeration and batch submission
//! - `worker`: per-handle module sync inside executor tasks
//! - `ledger`: exactly-once settlement per batch
//! - `in_progress`: claims that keep later ticks off in-flight handles

mod in_progress;
mod ledger;
mod scheduler;
mod worker;

pub use in_progress::InProgressMap;
pub use ledger::BatchLedger;
pub use scheduler::{BatchHandle, BatchReport, TickReport, WatchdogScheduler, MODULE_SYNC_OPERATION};
pub use worker::{BatchSummary, ModuleSyncWorker};
