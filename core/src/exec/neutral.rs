//! Per-worker neutral context (spec §4.4 "Context switch").
//!
//! Every switch between execution domains is routed through the
//! worker thread's neutral context: `switch_to(neutral)` from an ED,
//! scheduler bookkeeping, `switch_to(ed)` into whichever ED the
//! scheduler picked. With `corosensei`, a coroutine only runs while
//! its owning OS thread calls `resume()` on it, the thread's own
//! native stack *is* the neutral context, so there is no separate
//! struct to switch into. What this module tracks is the bookkeeping
//! the neutral context needs: which execution domain (if any) is
//! currently mounted on this worker thread, so code running deep
//! inside a runnable can find its own ED without threading a
//! reference through every call.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use crate::port::fiber::{self, FiberYielder};

use super::domain::ExecutionDomain;

thread_local! {
    static MOUNTED: RefCell<Option<Arc<ExecutionDomain>>> = const { RefCell::new(None) };

    /// Raw pointer to the `Yielder` of whichever fiber is running on
    /// this worker thread right now. Set at the top of the fiber's
    /// entry closure (see `ExecutionDomain::run_on`), read by
    /// `suspend_current` when a wait primitive deep inside a runnable
    /// needs to yield back to neutral without threading the `Yielder`
    /// through every call on the stack. Mirrors the thread-local
    /// yielder handle pattern used for reduction-point checks in
    /// stackful actor runtimes built on the same coroutine crate.
    static CURRENT_YIELDER: Cell<Option<*const FiberYielder>> = const { Cell::new(None) };
}

/// Mounts `ed` as the calling worker's current execution domain for
/// the duration of the returned guard. Only one ED is ever mounted on
/// a given worker thread at a time, nested mounts would mean the
/// worker resumed an ED from inside another ED's `run()`, which never
/// happens: all such hand-offs go through neutral first.
pub fn mount(ed: Arc<ExecutionDomain>) -> MountGuard {
    let previous = MOUNTED.with(|m| m.borrow_mut().replace(ed));
    debug_assert!(previous.is_none(), "neutral context remounted without unmounting");
    MountGuard { _private: () }
}

pub struct MountGuard {
    _private: (),
}

impl Drop for MountGuard {
    fn drop(&mut self) {
        MOUNTED.with(|m| {
            m.borrow_mut().take();
        });
    }
}

/// The execution domain currently mounted on this worker thread, if any.
pub fn current() -> Option<Arc<ExecutionDomain>> {
    MOUNTED.with(|m| m.borrow().clone())
}

/// Installs the running fiber's `Yielder`, for the duration of one
/// `run_on` call. Must be called from inside the fiber's own entry
/// closure, never from neutral.
pub(super) fn install_yielder(yielder: &FiberYielder) -> YielderGuard {
    CURRENT_YIELDER.with(|c| c.set(Some(yielder as *const FiberYielder)));
    YielderGuard { _private: () }
}

pub(super) struct YielderGuard {
    _private: (),
}

impl Drop for YielderGuard {
    fn drop(&mut self) {
        CURRENT_YIELDER.with(|c| c.set(None));
    }
}

/// `true` if the calling thread is currently running inside a fiber
/// (i.e. a wait primitive may call `suspend_current`).
pub fn can_suspend() -> bool {
    CURRENT_YIELDER.with(|c| c.get().is_some())
}

/// Suspends the fiber running on the calling thread, handing control
/// back to neutral. Panics if called from outside a fiber, that is
/// always a `BAD_ORDER` condition one level up, where the caller has
/// enough context to turn it into a `CoreError` instead.
pub fn suspend_current() {
    let ptr = CURRENT_YIELDER
        .with(|c| c.get())
        .expect("suspend_current called outside a running execution domain");
    // Safety: the pointer is only ever installed for the lifetime of
    // the `run_on` stack frame that owns the referenced `Yielder`, and
    // `suspend_current` can only be reached from code running on that
    // same stack (by construction: it's a fiber-local thread, and the
    // fiber cannot return until this call returns).
    let yielder = unsafe { &*ptr };
    fiber::suspend(yielder);
}
