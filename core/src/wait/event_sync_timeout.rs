//! `EventSyncTimeout` (spec §4.7 "Wait primitives").
//!
//! Usable only from code running inside a synchronization domain. A
//! waiter suspends via the ED suspend/resume handshake (spec §4.4)
//! rather than blocking the worker thread, and is resumed by
//! re-scheduling it into its own sync-domain once the event fires or
//! its timeout elapses, `wait`'s caller and `signal_one`/`signal_all`'s
//! caller never need to agree on which sync-domain that is, because
//! each waiter carries its own.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};
use crate::exec::domain::ExecutionDomain;
use crate::exec::neutral;
use crate::port::clock;
use crate::port::timer::{TimerHandle, TimerService};
use crate::sync_domain::SyncDomain;

struct Waiter {
    ed: Arc<ExecutionDomain>,
    sd: Arc<SyncDomain>,
    /// CAS-claimed by whichever of `signal_one`, `signal_all`, or the
    /// timer callback gets to this waiter first. Once claimed, the
    /// others must leave it alone, the classic dispatched-flag
    /// dedup (spec §2 supplemented feature, `PriorityQueueReorder`'s
    /// pattern, reused here for the same "only one resumer wins" need).
    claimed: Arc<AtomicBool>,
    outcome: Arc<Mutex<Option<bool>>>,
    timer_handle: Mutex<Option<TimerHandle>>,
}

impl Waiter {
    /// Claims the waiter and resumes its execution domain with
    /// `signalled`. No-op if another resumer already claimed it.
    fn resolve(&self, signalled: bool) {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.outcome.lock().unwrap() = Some(signalled);
        self.ed.signal_resume();
        self.sd.schedule(clock::now(), self.ed.clone());
    }
}

/// A linked list of pending waiters plus a saturating "already
/// signalled" count, scoped to one synchronization domain (spec §3
/// "Block" analogue for waits: "a linked list of (ED, expire-time,
/// result-slot)").
pub struct EventSyncTimeout {
    waiters: Mutex<VecDeque<Arc<Waiter>>>,
    /// Signals that arrived with nobody waiting. Saturates: once "all
    /// future waits succeed immediately" is reached it never resets
    /// except via an explicit `reset`.
    pending_signals: AtomicU64,
    all_signalled: AtomicBool,
}

impl EventSyncTimeout {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            waiters: Mutex::new(VecDeque::new()),
            pending_signals: AtomicU64::new(0),
            all_signalled: AtomicBool::new(false),
        })
    }

    /// Blocks the calling execution domain until signalled or `timeout`
    /// elapses. Must be called from inside a synchronization domain;
    /// returns `BAD_ORDER` otherwise (spec §7).
    ///
    /// Returns `Ok(true)` if signalled, `Ok(false)` on timeout.
    pub fn wait(self: &Arc<Self>, timeout: Duration, timer: &TimerService) -> CoreResult<bool> {
        let ed = neutral::current().ok_or(CoreError::BadOrder)?;
        let sd = ed
            .sync_context()
            .domain()
            .cloned()
            .ok_or(CoreError::BadOrder)?;

        if self.all_signalled.load(Ordering::Acquire) {
            return Ok(true);
        }
        if self
            .pending_signals
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return Ok(true);
        }

        let waiter = Arc::new(Waiter {
            ed: ed.clone(),
            sd,
            claimed: Arc::new(AtomicBool::new(false)),
            outcome: Arc::new(Mutex::new(None)),
            timer_handle: Mutex::new(None),
        });
        self.waiters.lock().unwrap().push_back(waiter.clone());

        if timeout != Duration::MAX {
            let deadline = clock::now() + timeout;
            let weak_waiter = Arc::downgrade(&waiter);
            let handle = timer.set(deadline, move || {
                if let Some(waiter) = weak_waiter.upgrade() {
                    waiter.resolve(false);
                }
            });
            *waiter.timer_handle.lock().unwrap() = Some(handle);
        }

        ed.suspend_prepare()?;
        ed.suspend_prepared();

        let outcome = waiter.outcome.lock().unwrap().take().unwrap_or(false);
        if let Some(handle) = waiter.timer_handle.lock().unwrap().take() {
            timer.cancel(handle);
        }
        Ok(outcome)
    }

    /// Resumes one waiter, FIFO. If none are pending, remembers the
    /// signal so the next `wait` call returns immediately.
    pub fn signal_one(&self) {
        loop {
            let next = self.waiters.lock().unwrap().pop_front();
            match next {
                Some(waiter) => {
                    if waiter.claimed.load(Ordering::Acquire) {
                        // Already resolved by its own timeout; try the next one.
                        continue;
                    }
                    waiter.resolve(true);
                    return;
                }
                None => {
                    self.pending_signals.fetch_add(1, Ordering::AcqRel);
                    return;
                }
            }
        }
    }

    /// Resumes every pending waiter and marks the event as
    /// permanently signalled (spec §4.5 "Cancellation & timeouts":
    /// "signal_all cancels the timer and drains").
    pub fn signal_all(&self) {
        self.all_signalled.store(true, Ordering::Release);
        let drained: Vec<_> = self.waiters.lock().unwrap().drain(..).collect();
        for waiter in drained {
            waiter.resolve(true);
        }
    }

    /// Reverses `signal_all`'s permanent-signal state, for an event
    /// being reused after a manual reset.
    pub fn reset(&self) {
        self.all_signalled.store(false, Ordering::Release);
        self.pending_signals.store(0, Ordering::Release);
    }

    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().unwrap().len()
    }
}

impl Default for EventSyncTimeout {
    fn default() -> Self {
        // `new` returns an `Arc` (required for the timer callback's weak
        // self-reference on individual waiters); `Default` is provided
        // only so this type composes with container defaults that don't
        // care about the `Arc` wrapping, unwrapping it back out.
        Arc::try_unwrap(Self::new()).unwrap_or_else(|_| unreachable!())
    }
}
