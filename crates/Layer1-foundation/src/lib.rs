//! # cmsync-foundation
//!
//! Foundation layer for CmSync:
//! - Error: 공통 에러 타입 (`Error`, `Result`)
//! - Config: 통합 설정 (`SyncConfig`)
//! - Storage: 레지스트리 저장소 trait + 구현 (InMemory, SQLite), JsonStore
//! - Event: 이벤트 발행 trait + 프로세스 내 EventBus
//!
//! ## 아키텍처
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │  cmsync-core (state machine, persistence, watchdog)     │
//! │                     │                                   │
//! │          ┌──────────┴──────────┐                        │
//! │          ▼                     ▼                        │
//! │   RegistryStore          EventPublisher                 │
//! │   (memory, sqlite)       (EventBus)                     │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, ExternalFailureKind, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    DmiAuthSettings, DmiSettings, EventSettings, ExecutorSettings, RegistrySettings, SyncConfig,
    WatchdogSettings, SYNC_CONFIG_FILE,
};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{
    format_registry_time, parse_registry_time, DataNode, FetchDescendants,
    InMemoryRegistryStore, JsonStore, RegistryStore, SqliteRegistryStore, REGISTRY_TIME_FORMAT,
};

// ============================================================================
// Event (이벤트 시스템)
// ============================================================================
pub use event::{
    BusMessage, EventBus, EventBusConfig, EventFilter, EventId, EventListener, EventPublisher,
    ListenerId,
};
