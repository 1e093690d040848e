//! Function-result memoization with expiration support
//!
//! `memoize` wraps a function so that calls with an already seen cache key
//! return the stored result instead of running the function again. Entries
//! can expire after a `max_age`, enforced by eviction timers, and the storage
//! backend is pluggable through the `Storage` trait. `memoize_decorator`
//! applies the same mechanism to methods and getters, one cache per object.

pub mod args;
pub mod cache;
pub mod config;
pub mod error;
pub mod method;
pub mod storage;

mod registry;
mod timer;

pub use args::Arguments;
pub use cache::{Memoized, memoize, memoize_clear, try_memoize};
pub use config::{MAX_TIMER_DELAY_MS, MemoizeConfig};
pub use error::MemoizeError;
pub use method::{
    MemoHost, MemoSlots, MemoizedGetter, MemoizedMethod, MethodDecorator, memoize_decorator,
};
pub use storage::{CacheEntry, Expiry, MapStorage, Storage};
pub use timer::{TimerRoute, route_timers_to};
