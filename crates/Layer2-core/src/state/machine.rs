//! CM handle state machine
//!
//! Pure mapping of (current composite state, trigger) to the next composite
//! state. No I/O and no clock; timestamps are stamped by persistence.
//!
//! ```text
//!   ADVISED ──SyncSuccess──► READY ◄──SyncSuccess── LOCKED
//!      │                       │                    ▲  │
//!      └─SyncFailure/Timeout───┴─SyncFailure/Timeout┘  └─(retry: attempt+1)
//!
//!   READY ──Upgrade(tag)──► LOCKED(MODULE_UPGRADE)
//!
//!   ADVISED | READY | LOCKED ──Delete──► DELETING ──Delete──► DELETED
//! ```

use super::lock_details::{format_details, upgrade_details, LockDetails};
use super::types::{CmHandleState, CompositeState, LockReason, LockReasonCategory};
use cmsync_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event that may move a handle to another state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// Registration of a handle that already exists (new handles start ADVISED)
    Register,
    /// Module sync against the DMI plugin succeeded
    SyncSuccess,
    /// Module sync failed; carries the error text
    SyncFailure(String),
    /// Delete requested
    Delete,
    /// Module sync did not finish before the task deadline
    ModuleSyncTimeout(String),
    /// Move a READY handle to a new module set tag
    Upgrade(String),
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::Register => "Register",
            Trigger::SyncSuccess => "SyncSuccess",
            Trigger::SyncFailure(_) => "SyncFailure",
            Trigger::Delete => "Delete",
            Trigger::ModuleSyncTimeout(_) => "ModuleSyncTimeout",
            Trigger::Upgrade(_) => "Upgrade",
        }
    }

    /// Trigger for a failed module sync; deadline errors lock with their own reason
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Timeout(details) => Trigger::ModuleSyncTimeout(details.clone()),
            other => Trigger::SyncFailure(other.to_string()),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of evaluating a trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub previous: CompositeState,
    pub next: CompositeState,
}

impl Transition {
    fn unchanged(current: &CompositeState) -> Self {
        Self {
            previous: current.clone(),
            next: current.clone(),
        }
    }

    /// Whether state or lock reason differ
    pub fn is_change(&self) -> bool {
        !self.previous.same_state_as(&self.next)
    }

    /// LOCKED to LOCKED: only the lock reason moves
    pub fn is_lock_update(&self) -> bool {
        self.is_change()
            && self.previous.state() == CmHandleState::Locked
            && self.next.state() == CmHandleState::Locked
    }
}

/// Stateless transition logic
#[derive(Debug, Clone, Copy, Default)]
pub struct StateMachine;

impl StateMachine {
    /// State of a freshly registered handle
    pub fn initial_state() -> CompositeState {
        CompositeState::advised()
    }

    /// Compute the next state.
    ///
    /// Errors only for a DELETED handle. Any trigger a state does not react
    /// to leaves state and lock reason untouched.
    pub fn next_state(current: &CompositeState, trigger: &Trigger) -> Result<Transition> {
        use CmHandleState::*;

        let next = match (current.state(), trigger) {
            (Deleted, _) => return Err(Error::invalid_transition(current.state(), trigger)),

            (Advised | Ready | Locked, Trigger::Delete) => CompositeState::deleting(),
            (Deleting, Trigger::Delete) => CompositeState::deleted(),

            (Advised | Locked, Trigger::SyncSuccess) => CompositeState::ready(),

            (Advised | Ready, Trigger::SyncFailure(error)) => {
                Self::lock(current, LockReasonCategory::ModuleSyncFailed, error)
            }
            (Locked, Trigger::SyncFailure(error)) => {
                let upgrading = current
                    .lock_reason()
                    .map(|r| r.reason.is_upgrade())
                    .unwrap_or(false);
                let category = if upgrading {
                    LockReasonCategory::ModuleUpgradeFailed
                } else {
                    LockReasonCategory::ModuleSyncFailed
                };
                Self::lock(current, category, error)
            }

            (Advised | Ready | Locked, Trigger::ModuleSyncTimeout(details)) => {
                Self::lock(current, LockReasonCategory::ModuleSyncTimedOut, details)
            }

            (Ready, Trigger::Upgrade(tag)) => CompositeState::locked(LockReason::new(
                LockReasonCategory::ModuleUpgrade,
                upgrade_details(tag),
            )),

            _ => return Ok(Transition::unchanged(current)),
        };

        Ok(Transition {
            previous: current.clone(),
            next,
        })
    }

    /// LOCKED with the next attempt number; the module set tag survives
    fn lock(current: &CompositeState, category: LockReasonCategory, error: &str) -> CompositeState {
        let details = LockDetails::from_lock_reason(current.lock_reason());
        let text = format_details(
            details.module_set_tag.as_deref(),
            details.next_attempt(),
            error,
        );
        CompositeState::locked(LockReason::new(category, text))
    }
}
