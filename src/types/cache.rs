//! Process-wide metadata caches.
//!
//! Derived metadata of types and members is computed once per raw handle and shared by
//! every wrapper of that handle. Entries are keyed by handle address, so they must be
//! dropped whenever the runtime may reuse addresses, i.e. after a domain unload.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

/// A concurrent memo table from raw handle address to shared metadata.
pub(crate) struct MetaCache<M> {
    name: &'static str,
    entries: OnceLock<DashMap<usize, Arc<M>>>,
}

impl<M> MetaCache<M> {
    pub(crate) const fn new(name: &'static str) -> Self {
        MetaCache {
            name,
            entries: OnceLock::new(),
        }
    }

    fn entries(&self) -> &DashMap<usize, Arc<M>> {
        self.entries.get_or_init(DashMap::new)
    }

    /// Returns the cached record for `key`, computing it on a miss.
    ///
    /// The computation runs without holding a shard lock; when two callers race on the
    /// same key the first inserted record wins and both observe it.
    pub(crate) fn get_or_compute<F>(&self, key: usize, compute: F) -> Arc<M>
    where
        F: FnOnce() -> M,
    {
        if let Some(entry) = self.entries().get(&key) {
            return entry.value().clone();
        }

        tracing::trace!(cache = self.name, key, "metadata cache miss");
        let computed = Arc::new(compute());
        self.entries()
            .entry(key)
            .or_insert(computed)
            .value()
            .clone()
    }

    pub(crate) fn reset(&self) {
        if let Some(entries) = self.entries.get() {
            tracing::debug!(cache = self.name, entries = entries.len(), "metadata cache reset");
            entries.clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.get().map_or(0, DashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_compute_once_until_reset() {
        let cache: MetaCache<String> = MetaCache::new("test");
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            "meta".to_string()
        };

        let first = cache.get_or_compute(0x1000, compute);
        let second = cache.get_or_compute(0x1000, compute);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);

        cache.reset();
        assert_eq!(cache.len(), 0);
        let third = cache.get_or_compute(0x1000, compute);
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
