use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::AbortHandle;
use tracing::{error, warn};

/// Runtime hosting every eviction timer. It is never shut down, so timers
/// survive the runtimes their callers run in, and its worker thread is never
/// joined, so it does not keep the process alive.
static TIMER_RUNTIME: LazyLock<Option<Runtime>> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("memoize-timer")
        .enable_time()
        .build()
        .map_err(|err| error!(error = %err, "failed to start the timer runtime"))
        .ok()
});

thread_local! {
    static ROUTED: RefCell<Option<Handle>> = const { RefCell::new(None) };
}

/// Routes eviction timers scheduled on the current thread to `handle` until
/// the returned guard is dropped.
///
/// Timers normally run on a runtime owned by this crate. Routing them lets a
/// test drive expiry with a paused clock:
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use memoize_rs::route_timers_to;
/// use tokio::runtime::Handle;
///
/// let _timers = route_timers_to(Handle::current());
/// # }
/// ```
///
/// Timers already routed to `handle` are dropped with its runtime, so that
/// runtime must outlive the entries cached while the guard is held.
pub fn route_timers_to(handle: Handle) -> TimerRoute {
    let previous = ROUTED.with(|routed| routed.replace(Some(handle)));
    TimerRoute {
        previous,
        _thread: PhantomData,
    }
}

/// Guard returned by [`route_timers_to`]; restores the previous routing on drop
#[must_use = "timers return to the default runtime when the guard is dropped"]
pub struct TimerRoute {
    previous: Option<Handle>,
    // Routing is per thread.
    _thread: PhantomData<*const ()>,
}

impl Drop for TimerRoute {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ROUTED.with(|routed| *routed.borrow_mut() = previous);
    }
}

impl fmt::Debug for TimerRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerRoute").finish_non_exhaustive()
    }
}

/// A pending one-shot timer
#[derive(Debug)]
pub(crate) struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Cancels the timer. No-op if it already fired.
    pub(crate) fn cancel(&self) {
        self.abort.abort();
    }
}

/// Runs `task` once after `delay` on the timer runtime, or on the runtime the
/// current thread routes timers to. Returns `None` when no runtime can host
/// the timer.
pub(crate) fn schedule_once<F>(delay: Duration, task: F) -> Option<TimerHandle>
where
    F: FnOnce() + Send + 'static,
{
    let timer = async move {
        tokio::time::sleep(delay).await;
        task();
    };

    let routed = ROUTED.with(|routed| routed.borrow().clone());
    let join = match routed {
        Some(handle) => handle.spawn(timer),
        None => match TIMER_RUNTIME.as_ref() {
            Some(runtime) => runtime.spawn(timer),
            None => {
                warn!(delay_ms = delay.as_millis() as u64, "no runtime available, timer dropped");
                return None;
            }
        },
    };

    Some(TimerHandle {
        abort: join.abort_handle(),
    })
}

#[cfg(test)]
fn is_routed() -> bool {
    ROUTED.with(|routed| routed.borrow().is_some())
}
