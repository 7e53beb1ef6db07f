//! Per-batch settlement ledger
//!
//! Every handle of a batch is settled exactly once: either by the batch work
//! itself or, after a timeout, by the completion watcher. Whoever loses the
//! race gets `false` and must discard its result.

use parking_lot::Mutex;
use std::collections::HashSet;

#[derive(Debug)]
pub struct BatchLedger {
    inner: Mutex<LedgerState>,
}

#[derive(Debug)]
struct LedgerState {
    unsettled: HashSet<String>,
    closed: bool,
}

impl BatchLedger {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Mutex::new(LedgerState {
                unsettled: ids.into_iter().map(Into::into).collect(),
                closed: false,
            }),
        }
    }

    /// Take the right to settle `id`
    pub fn settle(&self, id: &str) -> bool {
        let mut state = self.inner.lock();
        !state.closed && state.unsettled.remove(id)
    }

    /// Close the ledger and take every handle nobody settled yet
    pub fn close(&self) -> Vec<String> {
        let mut state = self.inner.lock();
        state.closed = true;
        let mut ids: Vec<String> = state.unsettled.drain().collect();
        ids.sort();
        ids
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn unsettled_count(&self) -> usize {
        self.inner.lock().unsettled.len()
    }
}
