//! Storage module for CmSync
//!
//! - `registry`: 레지스트리 저장소 trait, DataNode, xpath 헬퍼
//! - `memory`: 인메모리 레지스트리 (테스트, 단일 프로세스)
//! - `db`: SQLite 레지스트리 (영속)
//! - `json`: JSON - 설정 파일 저장/로드

mod db;
mod json;
mod memory;
pub mod registry;

// Registry (계층형 저장소)
pub use registry::{
    format_registry_time, parse_registry_time, DataNode, FetchDescendants, RegistryStore,
    REGISTRY_TIME_FORMAT, ROOT_PATH,
};

// Backends
pub use db::{SqliteRegistryStore, REGISTRY_DB_FILE};
pub use memory::InMemoryRegistryStore;

// JSON Storage (설정)
pub use json::JsonStore;
