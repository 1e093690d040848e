use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::args::Arguments;
use crate::error::MemoizeError;
use crate::storage::Storage;

/// Largest `max_age` accepted, in milliseconds (the maximum timer delay).
pub const MAX_TIMER_DELAY_MS: i64 = 2_147_483_647;

pub(crate) type KeyFn<A, K> = Arc<dyn Fn(&A) -> K + Send + Sync>;
pub(crate) type MaxAgeFn<A> = Arc<dyn Fn(&A) -> i64 + Send + Sync>;

enum MaxAgeSetting<A> {
    Unbounded,
    Millis(i64),
    PerCall(MaxAgeFn<A>),
}

impl<A> Clone for MaxAgeSetting<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Unbounded => Self::Unbounded,
            Self::Millis(ms) => Self::Millis(*ms),
            Self::PerCall(f) => Self::PerCall(Arc::clone(f)),
        }
    }
}

/// Configuration for `memoize`, `try_memoize` and `memoize_decorator`.
///
/// `A` is the argument tuple, `K` the cache key and `V` the cached value.
///
/// ```
/// use memoize_rs::MemoizeConfig;
/// use std::time::Duration;
///
/// let config: MemoizeConfig<(u32, String), u32, String> =
///     MemoizeConfig::new().max_age(Duration::from_secs(30));
/// ```
pub struct MemoizeConfig<A, K, V> {
    cache_key: KeyFn<A, K>,
    custom_key: bool,
    max_age: MaxAgeSetting<A>,
    cache: Option<Arc<dyn Storage<K, V>>>,
    name: Option<String>,
}

impl<A, V> MemoizeConfig<A, A::First, V>
where
    A: Arguments + 'static,
    A::First: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Keys the cache on the first argument, never expires, and stores entries
    /// in a fresh `MapStorage`.
    pub fn new() -> Self {
        Self {
            cache_key: Arc::new(|args: &A| args.first().clone()),
            custom_key: false,
            max_age: MaxAgeSetting::Unbounded,
            cache: None,
            name: None,
        }
    }
}

impl<A, V> Default for MemoizeConfig<A, A::First, V>
where
    A: Arguments + 'static,
    A::First: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<A, K, V> MemoizeConfig<A, K, V> {
    /// Keys the cache on whatever `cache_key` derives from the argument list.
    pub fn with_cache_key<F>(cache_key: F) -> Self
    where
        F: Fn(&A) -> K + Send + Sync + 'static,
    {
        Self {
            cache_key: Arc::new(cache_key),
            custom_key: true,
            max_age: MaxAgeSetting::Unbounded,
            cache: None,
            name: None,
        }
    }

    /// Expires entries after `max_age`, truncated to whole milliseconds with
    /// a floor of 1 ms. Only `Duration::ZERO` disables caching altogether.
    pub fn max_age(self, max_age: Duration) -> Self {
        let ms = if max_age.is_zero() {
            0
        } else {
            i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX).max(1)
        };
        self.max_age_ms(ms)
    }

    /// Expires entries after `ms` milliseconds. Must lie in
    /// `0..=MAX_TIMER_DELAY_MS`; `0` disables caching altogether.
    pub fn max_age_ms(mut self, ms: i64) -> Self {
        self.max_age = MaxAgeSetting::Millis(ms);
        self
    }

    /// Computes the max age from the arguments on every cache miss.
    ///
    /// Results of zero or below never expire; results above
    /// `MAX_TIMER_DELAY_MS` are clamped.
    pub fn max_age_with<F>(mut self, max_age: F) -> Self
    where
        F: Fn(&A) -> i64 + Send + Sync + 'static,
    {
        self.max_age = MaxAgeSetting::PerCall(Arc::new(max_age));
        self
    }

    /// Stores entries in `cache` instead of a fresh `MapStorage`.
    pub fn cache(mut self, cache: Arc<dyn Storage<K, V>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Overrides the display name used in logs and errors.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<Plan<A, K, V>, MemoizeError> {
        let lifetime = match &self.max_age {
            MaxAgeSetting::Unbounded => Lifetime::Cached(MaxAge::Never),
            MaxAgeSetting::Millis(ms) if *ms < 0 => {
                return Err(MemoizeError::NegativeMaxAge(*ms));
            }
            MaxAgeSetting::Millis(ms) if *ms > MAX_TIMER_DELAY_MS => {
                return Err(MemoizeError::MaxAgeTooLarge(*ms));
            }
            MaxAgeSetting::Millis(0) => Lifetime::Passthrough,
            MaxAgeSetting::Millis(ms) => {
                Lifetime::Cached(MaxAge::Fixed(Duration::from_millis(ms.unsigned_abs())))
            }
            MaxAgeSetting::PerCall(f) => Lifetime::Cached(MaxAge::PerCall(Arc::clone(f))),
        };

        Ok(Plan {
            cache_key: Arc::clone(&self.cache_key),
            custom_key: self.custom_key,
            lifetime,
            cache: self.cache.clone(),
            name: self.name.clone(),
        })
    }
}

impl<A, K, V> Clone for MemoizeConfig<A, K, V> {
    fn clone(&self) -> Self {
        Self {
            cache_key: Arc::clone(&self.cache_key),
            custom_key: self.custom_key,
            max_age: self.max_age.clone(),
            cache: self.cache.clone(),
            name: self.name.clone(),
        }
    }
}

impl<A, K, V> fmt::Debug for MemoizeConfig<A, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let max_age = match &self.max_age {
            MaxAgeSetting::Unbounded => "unbounded".to_string(),
            MaxAgeSetting::Millis(ms) => format!("{ms} ms"),
            MaxAgeSetting::PerCall(_) => "per call".to_string(),
        };
        f.debug_struct("MemoizeConfig")
            .field("custom_key", &self.custom_key)
            .field("max_age", &max_age)
            .field("custom_cache", &self.cache.is_some())
            .field("name", &self.name)
            .finish()
    }
}

/// A validated configuration, ready to build memoized functions from.
pub(crate) struct Plan<A, K, V> {
    pub(crate) cache_key: KeyFn<A, K>,
    pub(crate) custom_key: bool,
    pub(crate) lifetime: Lifetime<A>,
    pub(crate) cache: Option<Arc<dyn Storage<K, V>>>,
    pub(crate) name: Option<String>,
}

impl<A, K, V> Plan<A, K, V> {
    /// Whether any argument-dependent option is set.
    pub(crate) fn uses_arguments(&self) -> bool {
        self.custom_key || !matches!(self.lifetime, Lifetime::Cached(MaxAge::Never))
    }
}

impl<A, K, V> Clone for Plan<A, K, V> {
    fn clone(&self) -> Self {
        Self {
            cache_key: Arc::clone(&self.cache_key),
            custom_key: self.custom_key,
            lifetime: self.lifetime.clone(),
            cache: self.cache.clone(),
            name: self.name.clone(),
        }
    }
}

pub(crate) enum Lifetime<A> {
    /// `max_age` of zero: call straight through, cache nothing
    Passthrough,
    Cached(MaxAge<A>),
}

impl<A> Clone for Lifetime<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Passthrough => Self::Passthrough,
            Self::Cached(max_age) => Self::Cached(max_age.clone()),
        }
    }
}

pub(crate) enum MaxAge<A> {
    Never,
    Fixed(Duration),
    PerCall(MaxAgeFn<A>),
}

impl<A> MaxAge<A> {
    /// Time to live for an entry computed from `args`, `None` if it never expires.
    pub(crate) fn resolve(&self, args: &A) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::Fixed(duration) => Some(*duration),
            Self::PerCall(f) => {
                let ms = f(args);
                if ms <= 0 {
                    return None;
                }
                if ms > MAX_TIMER_DELAY_MS {
                    warn!(max_age_ms = ms, "per-call max age clamped to the maximum timer delay");
                    return Some(Duration::from_millis(MAX_TIMER_DELAY_MS.unsigned_abs()));
                }
                Some(Duration::from_millis(ms.unsigned_abs()))
            }
        }
    }
}

impl<A> Clone for MaxAge<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Never => Self::Never,
            Self::Fixed(duration) => Self::Fixed(*duration),
            Self::PerCall(f) => Self::PerCall(Arc::clone(f)),
        }
    }
}
