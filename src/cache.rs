use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::{KeyFn, Lifetime, MaxAge, MemoizeConfig, Plan};
use crate::error::MemoizeError;
use crate::registry::{FnId, StorageHandle, registry};
use crate::storage::{CacheEntry, MapStorage, Storage};

pub(crate) type CallFn<R, A, V, E> = Arc<dyn Fn(&R, A) -> Result<V, E> + Send + Sync>;

/// A memoized function.
///
/// Calls with a previously seen cache key return the stored result instead of
/// invoking the original function. Clones share the same cache and identity.
///
/// `R` is the receiver the function is invoked on; it is `()` for free
/// functions and the owning object for methods (see `MemoizedMethod`).
pub struct Memoized<A, K, V, E = Infallible, R = ()> {
    inner: Arc<Inner<A, K, V, E, R>>,
}

struct Inner<A, K, V, E, R> {
    id: FnId,
    name: String,
    func: CallFn<R, A, V, E>,
    mode: Mode<A, K, V>,
}

enum Mode<A, K, V> {
    Passthrough,
    Caching {
        cache_key: KeyFn<A, K>,
        storage: Arc<dyn Storage<K, V>>,
        max_age: MaxAge<A>,
    },
}

/// Memoizes an infallible function.
///
/// Arguments are passed as a tuple; with the default configuration the first
/// element is the cache key.
///
/// ```
/// use memoize_rs::{MemoizeConfig, memoize};
///
/// let square = memoize(|(n,): (u64,)| n * n, MemoizeConfig::new()).unwrap();
/// assert_eq!(square.call((12,)), 144);
/// ```
pub fn memoize<A, K, V, F>(
    f: F,
    config: MemoizeConfig<A, K, V>,
) -> Result<Memoized<A, K, V>, MemoizeError>
where
    F: Fn(A) -> V + Send + Sync + 'static,
    A: 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let plan = config.validate()?;
    let name = plan
        .name
        .clone()
        .unwrap_or_else(|| std::any::type_name::<F>().to_string());
    let func: CallFn<(), A, V, Infallible> = Arc::new(move |_: &(), args: A| Ok(f(args)));
    Ok(Memoized::from_plan(plan, name, func))
}

/// Memoizes a fallible function. Only `Ok` results are cached; errors are
/// returned unchanged and the next call with the same key runs the function
/// again.
pub fn try_memoize<A, K, V, E, F>(
    f: F,
    config: MemoizeConfig<A, K, V>,
) -> Result<Memoized<A, K, V, E>, MemoizeError>
where
    F: Fn(A) -> Result<V, E> + Send + Sync + 'static,
    A: 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: 'static,
{
    let plan = config.validate()?;
    let name = plan
        .name
        .clone()
        .unwrap_or_else(|| std::any::type_name::<F>().to_string());
    let func: CallFn<(), A, V, E> = Arc::new(move |_: &(), args: A| f(args));
    Ok(Memoized::from_plan(plan, name, func))
}

/// Empties the cache of a memoized function and cancels its pending
/// eviction timers. The function stays memoized and refills on later calls.
///
/// Fails with `NotMemoized` for pass-through functions (`max_age` of zero) and
/// with `NotClearable` when the storage does not support `clear`.
pub fn memoize_clear<A, K, V, E, R>(f: &Memoized<A, K, V, E, R>) -> Result<(), MemoizeError> {
    registry().clear(f.inner.id, &f.inner.name)
}

impl<A, K, V, E, R> Memoized<A, K, V, E, R>
where
    A: 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: 'static,
    R: 'static,
{
    pub(crate) fn from_plan(plan: Plan<A, K, V>, name: String, func: CallFn<R, A, V, E>) -> Self {
        let id = FnId::next();
        let mode = match plan.lifetime {
            Lifetime::Passthrough => Mode::Passthrough,
            Lifetime::Cached(max_age) => {
                let storage = plan
                    .cache
                    .unwrap_or_else(|| Arc::new(MapStorage::<K, V>::new()) as Arc<dyn Storage<K, V>>);
                registry().register(id, Arc::new(StorageHandle(Arc::clone(&storage))));
                Mode::Caching {
                    cache_key: plan.cache_key,
                    storage,
                    max_age,
                }
            }
        };

        Self {
            inner: Arc::new(Inner {
                id,
                name,
                func,
                mode,
            }),
        }
    }

    /// Calls the function on `receiver`, returning the cached result when the
    /// cache holds one for the derived key. For methods, `receiver` must be the
    /// object this cache is bound to.
    ///
    /// Stored entries are returned as they are, even past their expiry time:
    /// only the eviction timer removes them.
    pub(crate) fn try_call_with(&self, receiver: &R, args: A) -> Result<V, E> {
        let inner = &*self.inner;
        let Mode::Caching {
            cache_key,
            storage,
            max_age,
        } = &inner.mode
        else {
            return (inner.func)(receiver, args);
        };

        let key = cache_key(&args);
        if let Some(entry) = storage.get(&key) {
            trace!(function = %inner.name, "memoize cache hit");
            return Ok(entry.data);
        }

        let ttl = max_age.resolve(&args);
        let value = (inner.func)(receiver, args)?;
        debug!(
            function = %inner.name,
            max_age_ms = ttl.map(|d| d.as_millis() as u64),
            "memoize cache miss, storing result"
        );
        storage.set(key.clone(), CacheEntry::with_max_age(value.clone(), ttl));

        if let Some(ttl) = ttl {
            let storage = Arc::clone(storage);
            let name = inner.name.clone();
            registry().schedule_eviction(inner.id, ttl, move || {
                storage.delete(&key);
                debug!(function = %name, "memoized entry evicted");
            });
        }

        Ok(value)
    }
}

impl<A, K, V, E, R> Memoized<A, K, V, E, R> {
    /// Display name: the configured name, the declared member name for
    /// methods, or the original function's type name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// True when `max_age` was zero and the function caches nothing
    pub fn is_passthrough(&self) -> bool {
        matches!(self.inner.mode, Mode::Passthrough)
    }

    /// Number of eviction timers that have neither fired nor been cancelled
    pub fn pending_evictions(&self) -> usize {
        registry().pending_timers(self.inner.id)
    }
}

impl<A, K, V, E> Memoized<A, K, V, E, ()>
where
    A: 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: 'static,
{
    /// Calls a fallible memoized function
    pub fn try_call(&self, args: A) -> Result<V, E> {
        self.try_call_with(&(), args)
    }
}

impl<A, K, V, R> Memoized<A, K, V, Infallible, R>
where
    A: 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    R: 'static,
{
    pub(crate) fn call_with(&self, receiver: &R, args: A) -> V {
        match self.try_call_with(receiver, args) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl<A, K, V> Memoized<A, K, V, Infallible, ()>
where
    A: 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Calls an infallible memoized function
    pub fn call(&self, args: A) -> V {
        self.call_with(&(), args)
    }
}

impl<A, K, V, E, R> Clone for Memoized<A, K, V, E, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, K, V, E, R> fmt::Debug for Memoized<A, K, V, E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("name", &self.inner.name)
            .field("passthrough", &self.is_passthrough())
            .finish()
    }
}

impl<A, K, V, E, R> Drop for Inner<A, K, V, E, R> {
    fn drop(&mut self) {
        if let Mode::Caching { .. } = self.mode {
            registry().forget(self.id);
        }
    }
}
