//! CM handle state
//!
//! - `types`: CmHandleState, LockReason, CompositeState
//! - `machine`: StateMachine, Trigger, Transition
//! - `lock_details`: attempt counter / module set tag inside lock details
//! - `monitor`: per-state counters

pub mod lock_details;
pub mod machine;
pub mod monitor;
pub mod types;

pub use lock_details::LockDetails;
pub use machine::{StateMachine, Transition, Trigger};
pub use monitor::StateMonitor;
pub use types::{CmHandleState, CompositeState, LockReason, LockReasonCategory};
