//! The one-shot callable an execution domain runs (spec §4.4 "Runnable").
//!
//! The original design keeps small runnables inline in the ED to avoid
//! a heap allocation per call; this port always boxes the runnable.
//! `corosensei`'s coroutine already owns a dedicated stack per ED, so
//! the inline-buffer optimisation saves one allocation against a
//! budget that's already dominated by the stack itself, not worth the
//! unsafe, unverifiable inline storage it would take to reproduce
//! faithfully without a compiler to check it against.

/// A one-shot unit of work dispatched onto an execution domain.
pub trait Runnable: Send {
    /// Runs to completion (or until it suspends via a wait primitive,
    /// which unwinds back into the ED's fiber, not this call).
    fn run(self: Box<Self>);

    /// Called instead of `run` completing normally when the ED catches
    /// a fault while this runnable was active (spec §4.4 "Crash").
    /// Default does nothing, matching runnables that have no cleanup.
    fn on_crash(&self, _signal: i32) {}
}

impl<F: FnOnce() + Send> Runnable for F {
    fn run(self: Box<Self>) {
        (*self)()
    }
}
