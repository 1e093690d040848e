use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

/// When a cache entry stops being fresh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    At(SystemTime),
    Never,
}

/// A cached result together with its expiration time
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub data: V,
    pub expires_at: Expiry,
}

impl<V> CacheEntry<V> {
    /// Creates a new entry
    pub fn new(data: V, expires_at: Expiry) -> Self {
        Self { data, expires_at }
    }

    /// Creates an entry that expires after the given duration, or never
    pub fn with_max_age(data: V, max_age: Option<Duration>) -> Self {
        let expires_at = match max_age {
            Some(duration) => Expiry::At(SystemTime::now() + duration),
            None => Expiry::Never,
        };
        Self::new(data, expires_at)
    }

    /// Checks if this entry has passed its expiration time.
    ///
    /// The memoizer does not consult this on read; removal is driven by the
    /// eviction timer.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Expiry::At(at) => SystemTime::now() > at,
            Expiry::Never => false,
        }
    }
}

/// The map-like container a memoized function keeps its results in.
///
/// Implementations use interior mutability: entries are written from the call
/// path and deleted from eviction timers through a shared reference.
/// `clear` is optional; backends that implement it must also return `true`
/// from `supports_clear`, otherwise `memoize_clear` refuses them.
pub trait Storage<K, V>: Send + Sync {
    fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    fn get(&self, key: &K) -> Option<CacheEntry<V>>;

    fn set(&self, key: K, entry: CacheEntry<V>);

    fn delete(&self, key: &K);

    fn supports_clear(&self) -> bool {
        false
    }

    fn clear(&self) {}
}

/// Default backend: an exact-match hash map
#[derive(Debug)]
pub struct MapStorage<K, V> {
    map: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> MapStorage<K, V> {
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries currently stored
    pub fn len(&self) -> usize {
        self.map.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for MapStorage<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Storage<K, V> for MapStorage<K, V>
where
    K: Eq + Hash + Send + Sync,
    V: Clone + Send + Sync,
{
    fn has(&self, key: &K) -> bool {
        self.map
            .read()
            .map(|map| map.contains_key(key))
            .unwrap_or(false)
    }

    fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        if let Ok(map) = self.map.read() {
            return map.get(key).cloned();
        }
        None
    }

    fn set(&self, key: K, entry: CacheEntry<V>) {
        if let Ok(mut map) = self.map.write() {
            map.insert(key, entry);
        }
    }

    fn delete(&self, key: &K) {
        if let Ok(mut map) = self.map.write() {
            map.remove(key);
        }
    }

    fn supports_clear(&self) -> bool {
        true
    }

    fn clear(&self) {
        if let Ok(mut map) = self.map.write() {
            map.clear();
        }
    }
}
