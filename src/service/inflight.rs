//! In-process single-flight for background extractions.
//!
//! Only one extraction per search key runs at a time within a process.
//! Separate processes sharing a cache can still extract the same search.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::debug;

/// Search keys with an extraction in progress and when each began
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    keys: Arc<DashMap<String, Instant>>,
}

impl InFlight {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. `None` when another extraction already holds it.
    #[must_use]
    pub fn try_begin(&self, key: &str) -> Option<InFlightGuard> {
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                vacant.insert(Instant::now());
                Some(InFlightGuard {
                    keys: Arc::clone(&self.keys),
                    key: key.to_string(),
                })
            }
        }
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Releases its key when dropped
#[derive(Debug)]
pub struct InFlightGuard {
    keys: Arc<DashMap<String, Instant>>,
    key: String,
}

impl InFlightGuard {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Some((key, started)) = self.keys.remove(&self.key) {
            debug!("Extraction for {key} released after {:?}", started.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_waits_for_release() {
        let inflight = InFlight::new();
        let guard = inflight.try_begin("search").unwrap();
        assert!(inflight.try_begin("search").is_none());
        assert!(inflight.try_begin("other").is_some());
        assert!(inflight.contains("search"));

        drop(guard);
        assert!(!inflight.contains("search"));
        assert!(inflight.try_begin("search").is_some());
    }

    #[test]
    fn clones_share_claims() {
        let inflight = InFlight::new();
        let shared = inflight.clone();
        let _guard = inflight.try_begin("search").unwrap();
        assert!(shared.try_begin("search").is_none());
        assert_eq!(shared.len(), 1);
    }
}
