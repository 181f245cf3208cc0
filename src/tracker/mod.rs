// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Tracker-map and the two auxiliary sets the reader and retransmission
//! receiver consult alongside it: the missing-BOP placeholder set and the
//! EOP-status map.
//!
//! All three share one lock ordering rule (spec section 5): tracker-map is
//! always acquired before the request queue, never the other way around.

pub mod product_tracker;

pub use product_tracker::{ProductBuffer, ProductTracker, RecordOutcome, VecBuffer};

use crate::wire::bop::Signature;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Mutex;

/// Concurrent map of in-flight product trackers, keyed by product index.
///
/// Grounded on `reliability/history_cache.rs`'s lock-poisoning-recovery
/// idiom: a poisoned mutex still yields its guard rather than panicking the
/// calling thread, since one worker panicking shouldn't wedge the others.
#[derive(Default)]
pub struct TrackerMap {
    inner: DashMap<u32, ProductTracker>,
}

impl TrackerMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly-created tracker. Returns `false` (and leaves the
    /// existing entry untouched) if `index` is already tracked.
    pub fn create(&self, index: u32, tracker: ProductTracker) -> bool {
        use dashmap::mapref::entry::Entry;
        match self.inner.entry(index) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(tracker);
                true
            }
        }
    }

    pub fn contains(&self, index: u32) -> bool {
        self.inner.contains_key(&index)
    }

    /// Run `f` against the tracker for `index`, if one exists.
    pub fn with_mut<R>(&self, index: u32, f: impl FnOnce(&mut ProductTracker) -> R) -> Option<R> {
        self.inner.get_mut(&index).map(|mut t| f(&mut t))
    }

    /// Remove and return the tracker for `index`, handing ownership to the
    /// caller for finalization.
    pub fn remove(&self, index: u32) -> Option<ProductTracker> {
        self.inner.remove(&index).map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Set of product indices whose BOP was never seen. A tracked index in this
/// set is a placeholder: no `ProductTracker` exists for it yet, but the
/// reader and retransmission receiver both know not to re-request it.
///
/// Grounded on the same lock-poisoning-recovery idiom as [`TrackerMap`]
/// (`history_cache.rs`), using `std::sync::Mutex` rather than `parking_lot`
/// here since the set is small and short-held — no contention to optimize.
#[derive(Default)]
pub struct MissingBopSet {
    inner: Mutex<HashSet<u32>>,
}

impl MissingBopSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<u32>> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    /// Returns `true` if `index` was not already a placeholder.
    pub fn insert(&self, index: u32) -> bool {
        self.lock().insert(index)
    }

    pub fn remove(&self, index: u32) -> bool {
        self.lock().remove(&index)
    }

    pub fn contains(&self, index: u32) -> bool {
        self.lock().contains(&index)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// `index -> EOP arrived?` map, consulted when a tracker no longer exists
/// (already finalized or never created) but a late EOP or retransmission
/// handler still needs to know whether one was already seen.
#[derive(Default)]
pub struct EopStatusMap {
    inner: DashMap<u32, bool>,
}

impl EopStatusMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, index: u32) {
        self.inner.insert(index, true);
    }

    pub fn received(&self, index: u32) -> bool {
        self.inner.get(&index).map(|v| *v).unwrap_or(false)
    }

    /// Drop bookkeeping for a finalized or aborted product.
    pub fn forget(&self, index: u32) {
        self.inner.remove(&index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::product_tracker::VecBuffer;

    fn sig() -> Signature {
        [0u8; 16]
    }

    #[test]
    fn create_rejects_duplicate_index() {
        let map = TrackerMap::new();
        let t1 = ProductTracker::new(100, 50, sig(), Box::new(VecBuffer::new(100)));
        let t2 = ProductTracker::new(100, 50, sig(), Box::new(VecBuffer::new(100)));
        assert!(map.create(7, t1));
        assert!(!map.create(7, t2));
    }

    #[test]
    fn missing_bop_set_tracks_placeholders() {
        let set = MissingBopSet::new();
        assert!(set.insert(8));
        assert!(!set.insert(8));
        assert!(set.contains(8));
        assert!(set.remove(8));
        assert!(!set.contains(8));
    }

    #[test]
    fn eop_status_map_records_and_forgets() {
        let map = EopStatusMap::new();
        assert!(!map.received(12));
        map.mark(12);
        assert!(map.received(12));
        map.forget(12);
        assert!(!map.received(12));
    }
}
