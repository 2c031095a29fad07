//! Stackful coroutine port (spec §4.4, "Context switch").
//!
//! Execution domains are dispatched onto OS threads as stackful
//! coroutines rather than as native OS threads: a worker's neutral
//! context resumes an execution domain's fiber, the fiber runs until it
//! either completes or voluntarily suspends back into the neutral
//! context, and control always returns to the same worker that resumed
//! it. This mirrors the fiber/ucontext port surface of the original
//! implementation, substituted here with [`corosensei`] so the switch
//! itself is safe Rust rather than hand-written assembly.

use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

/// Control flow handed back across a suspend point. An execution domain
/// yields `Suspend` when it is blocking on a wait primitive and wants
/// the worker to go look for other runnable work; it yields nothing
/// else, resumption always hands back `()`.
pub struct Fiber {
    coro: Coroutine<(), (), ()>,
}

/// The yield side of a [`Fiber`], threaded through to the entry closure
/// so deeply-nested calls (e.g. a wait primitive blocking inside a
/// driver call) can suspend without unwinding back to the top.
pub type FiberYielder = Yielder<(), ()>;

/// Outcome of [`Fiber::resume`].
pub enum Resume {
    /// The fiber called [`FiberYielder::suspend`] and is still alive.
    Suspended,
    /// The entry closure returned; the fiber is finished and must not
    /// be resumed again.
    Completed,
}

impl Fiber {
    /// Builds a fiber around `entry`, allocating a dedicated stack of
    /// `stack_size` bytes (see `Config::execution_domain_stack_size`).
    /// The fiber does not start running until the first [`Self::resume`].
    pub fn new<F>(stack_size: usize, entry: F) -> std::io::Result<Self>
    where
        F: FnOnce(&FiberYielder) + 'static,
    {
        let stack = DefaultStack::new(stack_size)?;
        let coro = Coroutine::with_stack(stack, move |yielder: &FiberYielder, _input: ()| {
            entry(yielder);
        });
        Ok(Self { coro })
    }

    /// Switches the calling (neutral) context into the fiber. Returns
    /// once the fiber either suspends or completes.
    pub fn resume(&mut self) -> Resume {
        match self.coro.resume(()) {
            CoroutineResult::Yield(()) => Resume::Suspended,
            CoroutineResult::Return(()) => Resume::Completed,
        }
    }

    /// `true` once the entry closure has returned. Resuming a completed
    /// fiber again panics inside `corosensei`, so callers must check
    /// this (or track [`Resume::Completed`]) before calling again.
    pub fn done(&self) -> bool {
        self.coro.done()
    }
}

/// Suspends the currently-running fiber, handing control back to
/// whichever neutral context resumed it. Called from deep inside a
/// wait primitive (`EventSyncTimeout::wait`, `SyncDomain::reschedule`)
/// with the `Yielder` threaded down from the entry closure.
pub fn suspend(yielder: &FiberYielder) {
    yielder.suspend(());
}
