//! Per-state handle counters
//!
//! Updated on every persisted transition; seeded from the registry at startup.

use super::types::CmHandleState;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug, Default)]
pub struct StateMonitor {
    counts: [AtomicI64; 5],
}

impl StateMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all counters, e.g. after scanning the registry
    pub fn reset<I>(&self, states: I)
    where
        I: IntoIterator<Item = CmHandleState>,
    {
        for counter in &self.counts {
            counter.store(0, Ordering::SeqCst);
        }
        for state in states {
            self.counts[state.index()].fetch_add(1, Ordering::SeqCst);
        }
    }

    /// A handle moved between states; `None` on either side means created or removed
    pub fn record(&self, previous: Option<CmHandleState>, next: Option<CmHandleState>) {
        if previous == next {
            return;
        }
        if let Some(state) = previous {
            self.counts[state.index()].fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(state) = next {
            self.counts[state.index()].fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn count(&self, state: CmHandleState) -> i64 {
        self.counts[state.index()].load(Ordering::SeqCst)
    }

    /// Counts keyed by state name
    pub fn snapshot(&self) -> BTreeMap<&'static str, i64> {
        CmHandleState::ALL
            .iter()
            .map(|s| (s.as_str(), self.count(*s)))
            .collect()
    }
}
