//! CM handle inventory
//!
//! Registry layout, per-handle locking and the persistence layer that owns
//! every state write.

mod locks;
pub mod model;
pub mod paths;
mod persistence;

pub use locks::{KeyedGuard, KeyedLocks};
pub use model::{CmHandle, NewCmHandle};
pub use paths::{validate_id, RegistryPaths};
pub use persistence::{
    RegisterOutcome, RegistryPersistence, StateSnapshot, TransitionRecord, WriteOutcome,
};
