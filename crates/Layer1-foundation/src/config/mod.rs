//! Config - 통합 설정 관리
//!
//! - `sync.rs` - SyncConfig (executor, watchdog, registry, dmi, events)

mod sync;

pub use sync::{
    DmiAuthSettings, DmiSettings, EventSettings, ExecutorSettings, RegistrySettings, SyncConfig,
    WatchdogSettings, ENV_BATCH_SIZE, ENV_MAX_WORKERS, ENV_TASK_TIMEOUT_MS,
    ENV_WATCHDOG_PERIOD_MS, SYNC_CONFIG_FILE,
};
