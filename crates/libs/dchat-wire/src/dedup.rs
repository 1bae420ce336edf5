//! Bounded recency set of seen message ids.
//!
//! The relay delivers one logical message through several sub-links, so the
//! same envelope id shows up more than once. [`DedupCache::check_and_mark`] is
//! the single gate the inbound pipeline uses to drop the copies.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;

/// Default capacity of a [`DedupCache`].
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Capacity-bounded set of message ids with least-recently-touched eviction.
///
/// All operations take `&self`; the cache is shared between concurrently
/// running frame handlers of one account.
pub struct DedupCache {
    entries: Mutex<LruCache<String, ()>>,
}

impl DedupCache {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Pure lookup; does not refresh recency.
    pub fn has_seen(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    /// Insert `id`, or move it to the most recent position if present.
    pub fn mark_seen(&self, id: &str) {
        self.lock().put(id.to_string(), ());
    }

    /// Returns whether `id` was present before the call and leaves it marked.
    ///
    /// Lookup and insert happen under one lock, so two concurrent calls with
    /// the same id can never both observe `false`.
    pub fn check_and_mark(&self, id: &str) -> bool {
        let mut entries = self.lock();
        let seen = entries.contains(id);
        entries.put(id.to_string(), ());
        seen
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, ()>> {
        // Every operation is a single cache call, so a poisoned lock still
        // guards valid data.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_until_marked() {
        let cache = DedupCache::new(8);
        assert!(!cache.has_seen("a"));
        assert!(!cache.has_seen("a"));
        cache.mark_seen("a");
        assert!(cache.has_seen("a"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn check_and_mark_reports_first_sighting_once() {
        let cache = DedupCache::new(8);
        assert!(!cache.check_and_mark("m1"));
        assert!(cache.check_and_mark("m1"));
        assert!(cache.check_and_mark("m1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_least_recent_on_overflow() {
        let cache = DedupCache::new(3);
        for id in ["a", "b", "c", "d"] {
            cache.mark_seen(id);
        }
        assert!(!cache.has_seen("a"));
        assert!(cache.has_seen("b"));
        assert!(cache.has_seen("c"));
        assert!(cache.has_seen("d"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn remarking_protects_from_eviction() {
        let cache = DedupCache::new(3);
        for id in ["a", "b", "c", "a", "d"] {
            cache.mark_seen(id);
        }
        assert!(cache.has_seen("a"));
        assert!(!cache.has_seen("b"));
        assert!(cache.has_seen("c"));
        assert!(cache.has_seen("d"));
    }

    #[test]
    fn has_seen_does_not_refresh_recency() {
        let cache = DedupCache::new(2);
        cache.mark_seen("a");
        cache.mark_seen("b");
        assert!(cache.has_seen("a"));
        cache.mark_seen("c");
        assert!(!cache.has_seen("a"));
    }

    #[test]
    fn evicted_id_starts_a_new_epoch() {
        let cache = DedupCache::new(1);
        assert!(!cache.check_and_mark("a"));
        assert!(!cache.check_and_mark("b"));
        assert!(!cache.check_and_mark("a"));
        assert!(cache.check_and_mark("a"));
    }

    #[test]
    fn empty_id_is_an_ordinary_id() {
        let cache = DedupCache::default();
        assert!(!cache.check_and_mark(""));
        assert!(cache.has_seen(""));
        assert_eq!(cache.capacity(), DEFAULT_CAPACITY);
    }

    #[test]
    fn zero_capacity_still_dedups_the_latest_id() {
        let cache = DedupCache::new(0);
        assert_eq!(cache.capacity(), 1);
        assert!(!cache.check_and_mark("a"));
        assert!(cache.check_and_mark("a"));
    }

    #[test]
    fn clear_forgets_everything() {
        let cache = DedupCache::new(4);
        cache.mark_seen("a");
        cache.mark_seen("b");
        cache.clear();
        assert!(cache.is_empty());
        assert!(!cache.check_and_mark("a"));
    }

    #[test]
    fn concurrent_duplicates_pass_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let cache = Arc::new(DedupCache::new(64));
        let passed = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let passed = passed.clone();
                std::thread::spawn(move || {
                    if !cache.check_and_mark("same-id") {
                        passed.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }
        assert_eq!(passed.load(Ordering::SeqCst), 1);
    }
}
