//! Process-wide side table from a memoized function's identity to its cache
//! storage and pending eviction timers.
//!
//! The table holds only the storage and the timers, never the memoized
//! function itself; a function's entries are dropped together with its last
//! handle (see `forget`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::error::MemoizeError;
use crate::storage::Storage;
use crate::timer::{self, TimerHandle};

/// Identity of a memoized function, shared by all its clones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct FnId(u64);

impl FnId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Type-erased view of a `Storage`, enough to clear it
pub(crate) trait ClearableCache: Send + Sync {
    fn supports_clear(&self) -> bool;

    fn clear(&self);
}

pub(crate) struct StorageHandle<K, V>(pub(crate) Arc<dyn Storage<K, V>>);

impl<K, V> ClearableCache for StorageHandle<K, V> {
    fn supports_clear(&self) -> bool {
        self.0.supports_clear()
    }

    fn clear(&self) {
        self.0.clear();
    }
}

pub(crate) struct Registry {
    caches: RwLock<HashMap<FnId, Arc<dyn ClearableCache>>>,
    timers: Mutex<HashMap<FnId, HashMap<u64, TimerHandle>>>,
    next_timer: AtomicU64,
}

static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub(crate) fn registry() -> &'static Registry {
    &REGISTRY
}

impl Registry {
    fn new() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            next_timer: AtomicU64::new(1),
        }
    }

    /// Associates `id` with the storage backing it
    pub(crate) fn register(&self, id: FnId, cache: Arc<dyn ClearableCache>) {
        self.caches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, cache);
    }

    /// Schedules `evict` after `delay` and records the timer under `id`.
    /// The timer drops its own record when it fires.
    pub(crate) fn schedule_eviction<F>(&self, id: FnId, delay: Duration, evict: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let timer_id = self.next_timer.fetch_add(1, Ordering::Relaxed);

        // Held across the spawn so a timer firing on another thread cannot
        // remove its record before it is inserted.
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = timer::schedule_once(delay, move || {
            evict();
            registry().timer_fired(id, timer_id);
        });
        if let Some(handle) = handle {
            timers.entry(id).or_default().insert(timer_id, handle);
        }
    }

    fn timer_fired(&self, id: FnId, timer_id: u64) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = timers.get_mut(&id) {
            pending.remove(&timer_id);
            if pending.is_empty() {
                timers.remove(&id);
            }
        }
    }

    /// Number of eviction timers still pending for `id`
    pub(crate) fn pending_timers(&self, id: FnId) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map_or(0, HashMap::len)
    }

    /// Clears the storage registered for `id` and cancels its pending timers
    pub(crate) fn clear(&self, id: FnId, name: &str) -> Result<(), MemoizeError> {
        let cache = self
            .caches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or_else(|| MemoizeError::NotMemoized(name.to_string()))?;

        if !cache.supports_clear() {
            return Err(MemoizeError::NotClearable(name.to_string()));
        }

        // Timers go first: an entry stored after them keeps its new timer.
        let cancelled = self.cancel_timers(id);
        cache.clear();
        debug!(function = name, cancelled, "memoized cache cleared");
        Ok(())
    }

    /// Drops every association for `id`, cancelling its pending timers
    pub(crate) fn forget(&self, id: FnId) {
        let cache = self
            .caches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        self.cancel_timers(id);
        drop(cache);
    }

    fn cancel_timers(&self, id: FnId) -> usize {
        let pending = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .unwrap_or_default();
        for handle in pending.values() {
            handle.cancel();
        }
        pending.len()
    }

    #[cfg(test)]
    fn is_registered(&self, id: FnId) -> bool {
        self.caches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CacheEntry, Expiry, MapStorage};
    use crate::timer::route_timers_to;
    use tokio::runtime::Handle;

    struct Unclearable;

    impl ClearableCache for Unclearable {
        fn supports_clear(&self) -> bool {
            false
        }

        fn clear(&self) {}
    }

    #[test]
    fn test_fn_ids_are_unique() {
        assert_ne!(FnId::next(), FnId::next());
    }

    #[test]
    fn test_clear_unknown_function() {
        let err = registry().clear(FnId::next(), "missing").unwrap_err();
        assert_eq!(err, MemoizeError::NotMemoized("missing".to_string()));
    }

    #[test]
    fn test_clear_unclearable_storage() {
        let id = FnId::next();
        registry().register(id, Arc::new(Unclearable));

        let err = registry().clear(id, "frozen").unwrap_err();
        assert_eq!(err, MemoizeError::NotClearable("frozen".to_string()));
        registry().forget(id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_empties_storage_and_cancels_timers() {
        let _timers = route_timers_to(Handle::current());
        let id = FnId::next();
        let storage: Arc<MapStorage<i32, i32>> = Arc::new(MapStorage::new());
        registry().register(id, Arc::new(StorageHandle(storage.clone() as Arc<dyn Storage<i32, i32>>)));

        storage.set(1, CacheEntry::new(10, Expiry::Never));
        registry().schedule_eviction(id, Duration::from_secs(60), || {});
        registry().schedule_eviction(id, Duration::from_secs(60), || {});
        assert_eq!(registry().pending_timers(id), 2);

        registry().clear(id, "f").unwrap();
        assert!(storage.is_empty());
        assert_eq!(registry().pending_timers(id), 0);
        assert!(registry().is_registered(id));
        registry().forget(id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_timer_removes_its_record() {
        let _timers = route_timers_to(Handle::current());
        let id = FnId::next();
        registry().schedule_eviction(id, Duration::from_millis(10), || {});
        assert_eq!(registry().pending_timers(id), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry().pending_timers(id), 0);
    }

    #[test]
    fn test_forget_removes_association() {
        let id = FnId::next();
        let storage: Arc<dyn Storage<i32, i32>> = Arc::new(MapStorage::new());
        registry().register(id, Arc::new(StorageHandle(storage)));
        assert!(registry().is_registered(id));

        registry().forget(id);
        assert!(!registry().is_registered(id));
    }
}
