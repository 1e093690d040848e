use memoize_rs::{
    CacheEntry, Expiry, MapStorage, MemoizeConfig, Storage, memoize, route_timers_to,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::runtime::{Builder, Handle};

/// Storage whose deletes lag behind: eviction requests are recorded but the
/// entries stay readable.
#[derive(Default)]
struct LaggingStorage {
    map: RwLock<HashMap<u32, CacheEntry<String>>>,
    deletes: AtomicUsize,
}

impl Storage<u32, String> for LaggingStorage {
    fn get(&self, key: &u32) -> Option<CacheEntry<String>> {
        self.map.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: u32, entry: CacheEntry<String>) {
        if let Ok(mut map) = self.map.write() {
            map.insert(key, entry);
        }
    }

    fn delete(&self, _key: &u32) {
        self.deletes.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_expired_entry_is_served_until_evicted() {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();
    let storage = Arc::new(LaggingStorage::default());
    let config: MemoizeConfig<(u32,), u32, String> = MemoizeConfig::new()
        .max_age_ms(10)
        .cache(storage.clone());

    let memoized = memoize(
        move |(id,): (u32,)| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            format!("user_{}", id)
        },
        config,
    )
    .unwrap();

    memoized.call((1,));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(storage.deletes.load(Ordering::SeqCst), 1);

    let entry = storage.get(&1).unwrap();
    assert!(entry.is_expired());

    // Past its expiry but still stored: a hit, not a recomputation.
    assert_eq!(memoized.call((1,)), "user_1");
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_entries_record_expiry() {
    let _timers = route_timers_to(Handle::current());
    let storage: Arc<MapStorage<u32, u32>> = Arc::new(MapStorage::new());

    let forever: MemoizeConfig<(u32,), u32, u32> = MemoizeConfig::new().cache(storage.clone());
    let memoized = memoize(|(n,): (u32,)| n, forever).unwrap();
    memoized.call((1,));
    assert_eq!(storage.get(&1).unwrap().expires_at, Expiry::Never);
    assert_eq!(memoized.pending_evictions(), 0);

    let bounded: MemoizeConfig<(u32,), u32, u32> = MemoizeConfig::new()
        .max_age(Duration::from_secs(60))
        .cache(storage.clone());
    let memoized = memoize(|(n,): (u32,)| n, bounded).unwrap();
    memoized.call((2,));
    assert!(matches!(storage.get(&2).unwrap().expires_at, Expiry::At(_)));
    assert_eq!(memoized.pending_evictions(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_per_call_max_age() {
    let _timers = route_timers_to(Handle::current());
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();

    let memoized = memoize(
        move |(ttl,): (i64,)| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            ttl
        },
        MemoizeConfig::new().max_age_with(|&(ttl,): &(i64,)| ttl),
    )
    .unwrap();

    memoized.call((20,));
    memoized.call((500,));
    memoized.call((0,));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(memoized.pending_evictions(), 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(memoized.pending_evictions(), 1);

    memoized.call((20,));
    memoized.call((500,));
    memoized.call((0,));
    assert_eq!(counter.load(Ordering::SeqCst), 4);
}

#[test]
fn test_expiry_without_runtime() {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();

    let memoized = memoize(
        move |(key,): (u32,)| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            key
        },
        MemoizeConfig::new().max_age_ms(20),
    )
    .unwrap();

    memoized.call((1,));
    memoized.call((1,));
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    std::thread::sleep(Duration::from_millis(300));
    memoized.call((1,));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[test]
fn test_entry_expires_after_caller_runtime_is_dropped() {
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();

    let memoized = memoize(
        move |(key,): (u32,)| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            key
        },
        MemoizeConfig::new().max_age_ms(20),
    )
    .unwrap();

    let runtime = Builder::new_current_thread().enable_time().build().unwrap();
    runtime.block_on(async {
        memoized.call((1,));
    });
    drop(runtime);
    assert_eq!(memoized.pending_evictions(), 1);

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(memoized.pending_evictions(), 0);

    memoized.call((1,));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}
