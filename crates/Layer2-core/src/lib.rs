//! cmsync-core: CM handle state synchronization
//!
//! Layer2 - 상태 머신, 레지스트리 영속화, watchdog
//!
//! # 주요 모듈
//!
//! - `state`: CM handle 상태, lock reason, 상태 머신
//! - `inventory`: 레지스트리 경로/모델, per-id 락, RegistryPersistence
//! - `dmi`: DMI plugin HTTP 클라이언트
//! - `notify`: LCM 이벤트 발행
//! - `watchdog`: 주기적 module sync 스케줄러
//! - `lifecycle`: 등록/삭제
//! - `engine`: 전체 조립
//!
//! # 사용 예시
//!
//! ```ignore
//! use cmsync_core::{HttpDmiClient, SyncEngine};
//! use cmsync_foundation::{EventBus, SqliteRegistryStore, SyncConfig};
//!
//! let config = SyncConfig::load()?;
//! let store = Arc::new(SqliteRegistryStore::new(&config.registry.resolve_data_dir()?)?);
//! let dmi = Arc::new(HttpDmiClient::new(&config.dmi)?);
//! let engine = SyncEngine::new(config, store, dmi, Arc::new(EventBus::new())).await?;
//!
//! engine.run(shutdown_token).await;
//! ```

pub mod dmi;
pub mod engine;
pub mod inventory;
pub mod lifecycle;
pub mod notify;
pub mod state;
pub mod watchdog;

// Re-exports: State
pub use state::{
    CmHandleState, CompositeState, LockDetails, LockReason, LockReasonCategory, StateMachine,
    StateMonitor, Transition, Trigger,
};

// Re-exports: Inventory
pub use inventory::{
    CmHandle, NewCmHandle, RegisterOutcome, RegistryPaths, RegistryPersistence, StateSnapshot,
    TransitionRecord, WriteOutcome,
};

// Re-exports: DMI
pub use dmi::{DmiClient, DmiMethod, DmiOperation, DmiResponse, HttpDmiClient};

// Re-exports: Notify
pub use notify::{EventNotifier, LcmEvent, LcmEventType};

// Re-exports: Watchdog
pub use watchdog::{BatchReport, BatchSummary, ModuleSyncWorker, TickReport, WatchdogScheduler};

// Re-exports: Lifecycle / Engine
pub use engine::SyncEngine;
pub use lifecycle::{CmHandleLifecycle, RegistrationResult, RegistrationStatus};
