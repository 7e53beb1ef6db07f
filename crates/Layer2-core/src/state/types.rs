//! CM handle lifecycle types

use super::lock_details::LockDetails;
use chrono::{DateTime, Utc};
use cmsync_foundation::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Largest exponent of the retry backoff
const MAX_BACKOFF_EXPONENT: u32 = 16;

// ============================================================================
// CmHandleState
// ============================================================================

/// Lifecycle state of a CM handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CmHandleState {
    Advised,
    Ready,
    Locked,
    Deleting,
    Deleted,
}

impl CmHandleState {
    pub const ALL: [CmHandleState; 5] = [
        CmHandleState::Advised,
        CmHandleState::Ready,
        CmHandleState::Locked,
        CmHandleState::Deleting,
        CmHandleState::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Advised => "ADVISED",
            Self::Ready => "READY",
            Self::Locked => "LOCKED",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
        }
    }

    /// Position in [`CmHandleState::ALL`]
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl fmt::Display for CmHandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CmHandleState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("Unknown cm handle state '{}'", s)))
    }
}

// ============================================================================
// LockReasonCategory
// ============================================================================

/// Why a handle is LOCKED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockReasonCategory {
    LockedMisbehaving,
    ModuleSyncFailed,
    ModuleSyncTimedOut,
    ModuleUpgrade,
    ModuleUpgradeFailed,
}

impl LockReasonCategory {
    pub const ALL: [LockReasonCategory; 5] = [
        LockReasonCategory::LockedMisbehaving,
        LockReasonCategory::ModuleSyncFailed,
        LockReasonCategory::ModuleSyncTimedOut,
        LockReasonCategory::ModuleUpgrade,
        LockReasonCategory::ModuleUpgradeFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LockedMisbehaving => "LOCKED_MISBEHAVING",
            Self::ModuleSyncFailed => "MODULE_SYNC_FAILED",
            Self::ModuleSyncTimedOut => "MODULE_SYNC_TIMED_OUT",
            Self::ModuleUpgrade => "MODULE_UPGRADE",
            Self::ModuleUpgradeFailed => "MODULE_UPGRADE_FAILED",
        }
    }

    /// Whether the watchdog should try again
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::LockedMisbehaving)
    }

    /// Upgrade in progress or failed upgrade
    pub fn is_upgrade(&self) -> bool {
        matches!(self, Self::ModuleUpgrade | Self::ModuleUpgradeFailed)
    }

    /// Operator-facing message logged when a handle locks for this reason
    pub fn message(&self) -> &'static str {
        match self {
            Self::LockedMisbehaving => "cm handle is misbehaving and needs manual intervention",
            Self::ModuleSyncFailed => "module sync failed, retry scheduled",
            Self::ModuleSyncTimedOut => "module sync did not finish in time, retry scheduled",
            Self::ModuleUpgrade => "module upgrade requested",
            Self::ModuleUpgradeFailed => "module upgrade failed, retry scheduled",
        }
    }
}

impl fmt::Display for LockReasonCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockReasonCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|reason| reason.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("Unknown lock reason '{}'", s)))
    }
}

/// Structured lock reason persisted under `state/lock-reason`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReason {
    pub reason: LockReasonCategory,
    pub details: String,
}

impl LockReason {
    pub fn new(reason: LockReasonCategory, details: impl Into<String>) -> Self {
        Self {
            reason,
            details: details.into(),
        }
    }
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.reason, self.details)
    }
}

// ============================================================================
// CompositeState
// ============================================================================

/// Lifecycle state plus lock reason.
///
/// The lock reason is present exactly when the state is LOCKED; every
/// constructor enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompositeState {
    state: CmHandleState,
    lock_reason: Option<LockReason>,
    last_update_time: Option<DateTime<Utc>>,
}

impl CompositeState {
    /// Validated constructor
    pub fn new(state: CmHandleState, lock_reason: Option<LockReason>) -> Result<Self> {
        match (state, &lock_reason) {
            (CmHandleState::Locked, None) => Err(Error::Validation(
                "LOCKED state requires a lock reason".to_string(),
            )),
            (CmHandleState::Locked, Some(_)) | (_, None) => Ok(Self {
                state,
                lock_reason,
                last_update_time: None,
            }),
            (other, Some(_)) => Err(Error::Validation(format!(
                "{} state cannot carry a lock reason",
                other
            ))),
        }
    }

    fn unlocked(state: CmHandleState) -> Self {
        Self {
            state,
            lock_reason: None,
            last_update_time: None,
        }
    }

    pub fn advised() -> Self {
        Self::unlocked(CmHandleState::Advised)
    }

    pub fn ready() -> Self {
        Self::unlocked(CmHandleState::Ready)
    }

    pub fn deleting() -> Self {
        Self::unlocked(CmHandleState::Deleting)
    }

    pub fn deleted() -> Self {
        Self::unlocked(CmHandleState::Deleted)
    }

    pub fn locked(reason: LockReason) -> Self {
        Self {
            state: CmHandleState::Locked,
            lock_reason: Some(reason),
            last_update_time: None,
        }
    }

    pub fn with_last_update_time(mut self, ts: DateTime<Utc>) -> Self {
        self.last_update_time = Some(ts);
        self
    }

    pub fn state(&self) -> CmHandleState {
        self.state
    }

    pub fn lock_reason(&self) -> Option<&LockReason> {
        self.lock_reason.as_ref()
    }

    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        self.last_update_time
    }

    /// Same state and lock reason, timestamps ignored
    pub fn same_state_as(&self, other: &CompositeState) -> bool {
        self.state == other.state && self.lock_reason == other.lock_reason
    }

    /// ADVISED, or LOCKED for a reason the watchdog may retry
    pub fn needs_sync(&self) -> bool {
        match self.state {
            CmHandleState::Advised => true,
            CmHandleState::Locked => self
                .lock_reason
                .as_ref()
                .map(|r| r.reason.is_retryable())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Whether a LOCKED handle may be retried at `now`.
    ///
    /// A requested upgrade starts right away. Failed attempts wait
    /// `backoff_base * 2^attempt` after the last update.
    pub fn retry_due(&self, now: DateTime<Utc>, backoff_base: Duration) -> bool {
        let Some(reason) = self.lock_reason.as_ref().filter(|r| r.reason.is_retryable()) else {
            return false;
        };
        if reason.reason == LockReasonCategory::ModuleUpgrade {
            return true;
        }
        let Some(last_update) = self.last_update_time else {
            return true;
        };
        let attempt = LockDetails::parse(&reason.details).attempt.unwrap_or(0);
        let wait = backoff_base.saturating_mul(1u32 << attempt.min(MAX_BACKOFF_EXPONENT));
        (now - last_update)
            .to_std()
            .map(|elapsed| elapsed >= wait)
            .unwrap_or(false)
    }
}

impl fmt::Display for CompositeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lock_reason {
            Some(reason) => write!(f, "{} [{}]", self.state, reason),
            None => write!(f, "{}", self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_enforced_by_constructor() {
        assert!(CompositeState::new(CmHandleState::Locked, None).is_err());
        assert!(CompositeState::new(
            CmHandleState::Ready,
            Some(LockReason::new(LockReasonCategory::ModuleSyncFailed, "x"))
        )
        .is_err());
        assert!(CompositeState::new(CmHandleState::Advised, None).is_ok());
    }

    #[test]
    fn test_names_round_trip() {
        for state in CmHandleState::ALL {
            assert_eq!(state.as_str().parse::<CmHandleState>().unwrap(), state);
        }
        for reason in LockReasonCategory::ALL {
            assert_eq!(reason.as_str().parse::<LockReasonCategory>().unwrap(), reason);
        }
        assert!("UNKNOWN".parse::<CmHandleState>().is_err());
        assert_eq!(
            serde_json::to_string(&LockReasonCategory::ModuleSyncTimedOut).unwrap(),
            "\"MODULE_SYNC_TIMED_OUT\""
        );
    }

    #[test]
    fn test_needs_sync() {
        assert!(CompositeState::advised().needs_sync());
        assert!(!CompositeState::ready().needs_sync());
        assert!(CompositeState::locked(LockReason::new(
            LockReasonCategory::ModuleSyncTimedOut,
            "t"
        ))
        .needs_sync());
        assert!(!CompositeState::locked(LockReason::new(
            LockReasonCategory::LockedMisbehaving,
            "m"
        ))
        .needs_sync());
    }

    #[test]
    fn test_retry_backoff_doubles_per_attempt() {
        let last = Utc::now();
        let base = Duration::from_secs(60);
        let failed = |details: &str| {
            CompositeState::locked(LockReason::new(LockReasonCategory::ModuleSyncFailed, details))
                .with_last_update_time(last)
        };

        // attempt #1 waits 2 minutes
        let first = failed("Attempt #1 failed: 503");
        assert!(!first.retry_due(last + chrono::Duration::seconds(100), base));
        assert!(first.retry_due(last + chrono::Duration::seconds(120), base));

        // attempt #3 waits 8 minutes
        let third = failed("Attempt #3 failed: 503");
        assert!(!third.retry_due(last + chrono::Duration::seconds(400), base));
        assert!(third.retry_due(last + chrono::Duration::seconds(480), base));

        // no base means every tick
        assert!(third.retry_due(last, Duration::ZERO));
    }

    #[test]
    fn test_retry_due_by_reason() {
        let now = Utc::now();
        let base = Duration::from_secs(60);
        let upgrade = CompositeState::locked(LockReason::new(
            LockReasonCategory::ModuleUpgrade,
            "Upgrade to ModuleSetTag: tag-2",
        ))
        .with_last_update_time(now);
        assert!(upgrade.retry_due(now, base));

        let misbehaving = CompositeState::locked(LockReason::new(
            LockReasonCategory::LockedMisbehaving,
            "m",
        ));
        assert!(!misbehaving.retry_due(now, Duration::ZERO));
        assert!(!CompositeState::advised().retry_due(now, Duration::ZERO));

        // a clock behind the stored timestamp never fires early
        let ahead = CompositeState::locked(LockReason::new(
            LockReasonCategory::ModuleSyncTimedOut,
            "Attempt #1 failed: t",
        ))
        .with_last_update_time(now + chrono::Duration::seconds(30));
        assert!(!ahead.retry_due(now, Duration::ZERO));
    }
}
