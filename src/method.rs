//! Memoization for methods and getters.
//!
//! A receiver type embeds a [`MemoSlots`] field and implements [`MemoHost`].
//! Members declared through a [`MethodDecorator`] keep their cache state in
//! the slots of the receiver they are called on, so every object gets its own
//! cache and the state goes away with the object.
//!
//! ```
//! use std::sync::LazyLock;
//! use memoize_rs::{MemoHost, MemoSlots, MemoizeConfig, MemoizedMethod, memoize_decorator};
//!
//! struct Circle {
//!     radius: f64,
//!     slots: MemoSlots,
//! }
//!
//! impl MemoHost for Circle {
//!     fn memo_slots(&self) -> &MemoSlots {
//!         &self.slots
//!     }
//! }
//!
//! static SCALED_AREA: LazyLock<MemoizedMethod<Circle, (u32,), u32, f64>> = LazyLock::new(|| {
//!     memoize_decorator(MemoizeConfig::new())
//!         .expect("valid config")
//!         .method("scaled_area", |c: &Circle, (k,): (u32,)| {
//!             std::f64::consts::PI * c.radius * c.radius * f64::from(k)
//!         })
//! });
//!
//! let circle = Circle { radius: 2.0, slots: MemoSlots::default() };
//! let area = SCALED_AREA.call(&circle, (3,));
//! assert_eq!(area, SCALED_AREA.call(&circle, (3,)));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::cache::{CallFn, Memoized};
use crate::config::{MemoizeConfig, Plan};
use crate::error::MemoizeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MemberId(u64);

impl MemberId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Per-object storage for memoized members.
///
/// Cloning yields an empty table: a cloned object starts with fresh caches.
#[derive(Default)]
pub struct MemoSlots {
    slots: Mutex<HashMap<MemberId, Box<dyn Any + Send + Sync>>>,
}

impl MemoSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of members that have cache state on this object
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Clone for MemoSlots {
    fn clone(&self) -> Self {
        Self::default()
    }
}

impl fmt::Debug for MemoSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoSlots")
            .field("members", &self.len())
            .finish()
    }
}

/// A receiver that can hold memoized member state
pub trait MemoHost {
    fn memo_slots(&self) -> &MemoSlots;
}

/// Validates `config` once and returns a decorator for declaring memoized
/// methods and getters with it.
pub fn memoize_decorator<A, K, V>(
    config: MemoizeConfig<A, K, V>,
) -> Result<MethodDecorator<A, K, V>, MemoizeError> {
    Ok(MethodDecorator {
        plan: config.validate()?,
    })
}

/// Declares memoized members sharing one configuration
pub struct MethodDecorator<A, K, V> {
    plan: Plan<A, K, V>,
}

impl<A, K, V> MethodDecorator<A, K, V> {
    /// Declares a memoized method with one cache per receiver
    pub fn method<R, F>(&self, name: &str, f: F) -> MemoizedMethod<R, A, K, V>
    where
        F: Fn(&R, A) -> V + Send + Sync + 'static,
        R: 'static,
        A: 'static,
        V: 'static,
    {
        self.try_method(name, move |receiver: &R, args: A| {
            Ok::<V, Infallible>(f(receiver, args))
        })
    }

    /// Declares a fallible memoized method; errors are not cached
    pub fn try_method<R, E, F>(&self, name: &str, f: F) -> MemoizedMethod<R, A, K, V, E>
    where
        F: Fn(&R, A) -> Result<V, E> + Send + Sync + 'static,
    {
        MemoizedMethod {
            id: MemberId::next(),
            name: self.plan.name.clone().unwrap_or_else(|| name.to_string()),
            plan: self.plan.clone(),
            func: Arc::new(f),
        }
    }

    /// Declares a getter computed once per receiver.
    ///
    /// Getters take no arguments, so `max_age` and `cache_key` do not apply:
    /// the first value read is kept for the receiver's lifetime.
    pub fn getter<R, W, F>(&self, name: &str, f: F) -> MemoizedGetter<R, W>
    where
        F: Fn(&R) -> W + Send + Sync + 'static,
        R: 'static,
        W: 'static,
    {
        self.try_getter(name, move |receiver: &R| Ok::<W, Infallible>(f(receiver)))
    }

    /// Declares a fallible getter; an error leaves the getter uncomputed
    pub fn try_getter<R, W, E, F>(&self, name: &str, f: F) -> MemoizedGetter<R, W, E>
    where
        F: Fn(&R) -> Result<W, E> + Send + Sync + 'static,
    {
        if self.plan.uses_arguments() {
            debug!(getter = name, "max_age and cache_key are ignored for getters");
        }
        MemoizedGetter {
            id: MemberId::next(),
            name: name.to_string(),
            func: Arc::new(f),
        }
    }
}

impl<A, K, V> fmt::Debug for MethodDecorator<A, K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDecorator")
            .field("name", &self.plan.name)
            .finish()
    }
}

/// A memoized method; see [`MethodDecorator::method`]
pub struct MemoizedMethod<R, A, K, V, E = Infallible> {
    id: MemberId,
    name: String,
    plan: Plan<A, K, V>,
    func: CallFn<R, A, V, E>,
}

impl<R, A, K, V, E> MemoizedMethod<R, A, K, V, E>
where
    R: MemoHost + 'static,
    A: 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: 'static,
{
    /// The memoized function backing this method on `receiver`, created on
    /// first use. Pass it to `memoize_clear` to reset the receiver's cache;
    /// calls always go through the method so they stay on their own receiver.
    pub fn bound(&self, receiver: &R) -> Memoized<A, K, V, E, R> {
        let mut slots = receiver
            .memo_slots()
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = slots
            .get(&self.id)
            .and_then(|slot| slot.downcast_ref::<Memoized<A, K, V, E, R>>())
        {
            return existing.clone();
        }

        let memoized = Memoized::from_plan(
            self.plan.clone(),
            self.name.clone(),
            Arc::clone(&self.func),
        );
        slots.insert(self.id, Box::new(memoized.clone()));
        memoized
    }

    pub fn try_call(&self, receiver: &R, args: A) -> Result<V, E> {
        self.bound(receiver).try_call_with(receiver, args)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<R, A, K, V> MemoizedMethod<R, A, K, V, Infallible>
where
    R: MemoHost + 'static,
    A: 'static,
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn call(&self, receiver: &R, args: A) -> V {
        self.bound(receiver).call_with(receiver, args)
    }
}

impl<R, A, K, V, E> Clone for MemoizedMethod<R, A, K, V, E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            plan: self.plan.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<R, A, K, V, E> fmt::Debug for MemoizedMethod<R, A, K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedMethod")
            .field("name", &self.name)
            .finish()
    }
}

/// A getter computed once per receiver; see [`MethodDecorator::getter`]
pub struct MemoizedGetter<R, W, E = Infallible> {
    id: MemberId,
    name: String,
    func: Arc<dyn Fn(&R) -> Result<W, E> + Send + Sync>,
}

impl<R, W, E> MemoizedGetter<R, W, E>
where
    R: MemoHost,
    W: Clone + Send + Sync + 'static,
{
    pub fn try_get(&self, receiver: &R) -> Result<W, E> {
        if let Some(value) = self.cached(receiver) {
            return Ok(value);
        }

        let value = (self.func)(receiver)?;
        let mut slots = receiver
            .memo_slots()
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // First stored value wins if another thread computed it meanwhile.
        let stored = slots
            .entry(self.id)
            .or_insert_with(|| Box::new(value.clone()) as Box<dyn Any + Send + Sync>);
        Ok(stored.downcast_ref::<W>().cloned().unwrap_or(value))
    }

    fn cached(&self, receiver: &R) -> Option<W> {
        receiver
            .memo_slots()
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.id)
            .and_then(|slot| slot.downcast_ref::<W>().cloned())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<R, W> MemoizedGetter<R, W, Infallible>
where
    R: MemoHost,
    W: Clone + Send + Sync + 'static,
{
    pub fn get(&self, receiver: &R) -> W {
        match self.try_get(receiver) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl<R, W, E> Clone for MemoizedGetter<R, W, E> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<R, W, E> fmt::Debug for MemoizedGetter<R, W, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedGetter")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Widget {
        slots: MemoSlots,
    }

    impl MemoHost for Widget {
        fn memo_slots(&self) -> &MemoSlots {
            &self.slots
        }
    }

    #[test]
    fn test_slots_created_lazily() {
        let decorator = memoize_decorator(MemoizeConfig::<(i32,), i32, i32>::new()).unwrap();
        let double = decorator.method("double", |_: &Widget, (n,): (i32,)| n * 2);

        let widget = Widget::default();
        assert!(widget.slots.is_empty());

        assert_eq!(double.call(&widget, (4,)), 8);
        assert_eq!(widget.slots.len(), 1);
    }

    #[test]
    fn test_bound_is_stable_per_receiver() {
        let decorator = memoize_decorator(MemoizeConfig::<(i32,), i32, i32>::new()).unwrap();
        let double = decorator.method("double", |_: &Widget, (n,): (i32,)| n * 2);

        let widget = Widget::default();
        let first = double.bound(&widget);
        let second = double.bound(&widget);
        assert_eq!(first.pending_evictions(), second.pending_evictions());
        assert_eq!(widget.slots.len(), 1);
        assert_eq!(first.name(), "double");
    }

    #[test]
    fn test_cloned_slots_start_empty() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let decorator = memoize_decorator(MemoizeConfig::<(), (), u8>::new()).unwrap();
        let answer = decorator.getter("answer", move |_: &Widget| {
            counter.fetch_add(1, Ordering::SeqCst);
            42u8
        });

        let widget = Widget::default();
        answer.get(&widget);
        let copy = Widget {
            slots: widget.slots.clone(),
        };
        assert!(copy.slots.is_empty());
        answer.get(&copy);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
