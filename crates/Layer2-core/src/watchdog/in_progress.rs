//! Handles currently being synced
//!
//! A handle claimed by one tick is skipped by later ticks until its batch
//! releases it or the entry outlives the TTL.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct InProgressMap {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl InProgressMap {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Claim `id`; false when another batch holds a live claim
    pub fn try_claim(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(id) {
            Some(claimed) if now.duration_since(*claimed) < self.ttl => false,
            _ => {
                entries.insert(id.to_string(), now);
                true
            }
        }
    }

    pub fn release(&self, id: &str) {
        self.entries.lock().remove(id);
    }

    pub fn release_all<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        let mut entries = self.entries.lock();
        for id in ids {
            entries.remove(id);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        let entries = self.entries.lock();
        entries
            .get(id)
            .map(|claimed| claimed.elapsed() < self.ttl)
            .unwrap_or(false)
    }

    /// Drop expired claims, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, claimed| claimed.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_release() {
        let map = InProgressMap::new(Duration::from_secs(60));
        assert!(map.try_claim("cmh-1"));
        assert!(!map.try_claim("cmh-1"));
        assert!(map.contains("cmh-1"));

        map.release("cmh-1");
        assert!(!map.contains("cmh-1"));
        assert!(map.try_claim("cmh-1"));
    }

    #[test]
    fn test_expired_claim_can_be_retaken() {
        let map = InProgressMap::new(Duration::from_millis(10));
        assert!(map.try_claim("cmh-1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!map.contains("cmh-1"));
        assert!(map.try_claim("cmh-1"));
    }

    #[test]
    fn test_purge_expired() {
        let map = InProgressMap::new(Duration::from_millis(10));
        map.try_claim("cmh-1");
        map.try_claim("cmh-2");
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(map.purge_expired(), 2);
        assert!(map.is_empty());
    }
}
