//! Bounded work queue: FIFO of keys waiting for a pipeline slot.
//!
//! The queue itself is unbounded in length; the bound is on how many keys
//! the control loop takes per tick.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::cache::ResultCache;
use crate::engine::tracker::InFlightTracker;
use crate::model::ItemKey;

/// What admission did with a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmitOutcome {
    Queued,
    AlreadyQueued,
    /// Dropped: a record is already cached.
    Cached,
    /// Dropped: a pipeline is running.
    InFlight,
}

impl AdmitOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            AdmitOutcome::Queued => "queued",
            AdmitOutcome::AlreadyQueued => "already_queued",
            AdmitOutcome::Cached => "cached",
            AdmitOutcome::InFlight => "in_flight",
        }
    }
}

#[derive(Default)]
struct Inner {
    order: VecDeque<ItemKey>,
    members: HashSet<ItemKey>,
}

#[derive(Default)]
pub struct WorkQueue {
    inner: Mutex<Inner>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit `key` unless it is cached, running or already waiting.
    pub fn admit(
        &self,
        key: &ItemKey,
        cache: &ResultCache,
        tracker: &InFlightTracker,
    ) -> AdmitOutcome {
        if cache.contains(key) {
            return AdmitOutcome::Cached;
        }
        if tracker.is_active(key) {
            return AdmitOutcome::InFlight;
        }
        if self.push(key.clone()) {
            AdmitOutcome::Queued
        } else {
            AdmitOutcome::AlreadyQueued
        }
    }

    /// Append to the back. Returns false if the key is already queued.
    pub fn push(&self, key: ItemKey) -> bool {
        let mut inner = self.lock();
        if !inner.members.insert(key.clone()) {
            return false;
        }
        inner.order.push_back(key);
        true
    }

    /// Remove up to `n` keys from the front, in arrival order.
    pub fn take(&self, n: usize) -> Vec<ItemKey> {
        let mut inner = self.lock();
        let n = n.min(inner.order.len());
        let taken: Vec<ItemKey> = inner.order.drain(..n).collect();
        for key in &taken {
            inner.members.remove(key);
        }
        taken
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.lock().members.contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EnrichmentRecord;
    use std::sync::Arc;

    #[test]
    fn fifo_order_and_partial_take() {
        let queue = WorkQueue::new();
        for k in ["a", "b", "c"] {
            assert!(queue.push(ItemKey::from(k)));
        }
        assert!(!queue.push(ItemKey::from("b")));

        assert_eq!(queue.take(2), vec![ItemKey::from("a"), ItemKey::from("b")]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take(10), vec![ItemKey::from("c")]);
        assert!(queue.take(1).is_empty());
    }

    #[test]
    fn taken_key_can_be_queued_again() {
        let queue = WorkQueue::new();
        queue.push(ItemKey::from("a"));
        queue.take(1);
        assert!(queue.push(ItemKey::from("a")));
    }

    #[test]
    fn admit_drops_cached_and_running_keys() {
        let queue = WorkQueue::new();
        let cache = ResultCache::new();
        let tracker = Arc::new(InFlightTracker::new());

        cache.insert_primary(&ItemKey::from("cached"), EnrichmentRecord::default());
        let _guard = tracker.try_begin(&ItemKey::from("running")).unwrap();

        assert_eq!(
            queue.admit(&ItemKey::from("cached"), &cache, &tracker),
            AdmitOutcome::Cached
        );
        assert_eq!(
            queue.admit(&ItemKey::from("running"), &cache, &tracker),
            AdmitOutcome::InFlight
        );
        assert_eq!(
            queue.admit(&ItemKey::from("new"), &cache, &tracker),
            AdmitOutcome::Queued
        );
        assert_eq!(
            queue.admit(&ItemKey::from("new"), &cache, &tracker),
            AdmitOutcome::AlreadyQueued
        );
        assert_eq!(queue.len(), 1);
    }
}
