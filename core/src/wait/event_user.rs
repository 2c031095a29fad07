//! `EventUser` (spec §4.7 "Wait primitives"): a manual- or auto-reset
//! event exposed to user code, built directly on top of
//! [`EventSyncTimeout`] the way `Source/EventUser.h` layers it over
//! `EventSyncTimeout` privately.

use std::sync::Arc;
use std::time::Duration;

use crate::error::CoreResult;
use crate::port::timer::TimerService;

use super::event_sync_timeout::EventSyncTimeout;

/// A CORBA-style `Event`: `manual_reset` events stay signalled until
/// `reset` is called explicitly; auto-reset events clear themselves
/// the instant one waiter consumes the signal.
pub struct EventUser {
    inner: Arc<EventSyncTimeout>,
    manual_reset: bool,
}

impl EventUser {
    pub fn new(manual_reset: bool, initial_state: bool) -> Arc<Self> {
        let inner = EventSyncTimeout::new();
        if initial_state {
            if manual_reset {
                inner.signal_all();
            } else {
                inner.signal_one();
            }
        }
        Arc::new(Self { inner, manual_reset })
    }

    /// Waits for the event, same cancellation/timeout semantics as
    /// [`EventSyncTimeout::wait`]. Auto-reset events clear themselves
    /// immediately after a successful wait, so exactly one waiter sees
    /// each signal.
    pub fn wait(self: &Arc<Self>, timeout: Duration, timer: &TimerService) -> CoreResult<bool> {
        let signalled = self.inner.wait(timeout, timer)?;
        if signalled && !self.manual_reset {
            self.inner.reset();
        }
        Ok(signalled)
    }

    /// Signals the event: every waiter for a manual-reset event, one
    /// waiter (or the saturating pending-signal counter) for an
    /// auto-reset event.
    pub fn signal(&self) {
        if self.manual_reset {
            self.inner.signal_all();
        } else {
            self.inner.signal_one();
        }
    }

    pub fn reset(&self) {
        self.inner.reset();
    }

    pub fn is_manual_reset(&self) -> bool {
        self.manual_reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::domain::{ExecutionDomain, SyncContext};
    use crate::heap::Heap;
    use crate::memctx::{DeadlinePolicy, MemContext};
    use crate::scheduler::MasterScheduler;
    use crate::sync_domain::SyncDomain;
    use std::sync::mpsc;
    use std::time::Duration as StdDuration;

    fn new_sd() -> Arc<SyncDomain> {
        let heap = Arc::new(Heap::new(64, 1024, 256));
        let mc = MemContext::new_core(heap, DeadlinePolicy::default());
        let scheduler = MasterScheduler::start(1);
        SyncDomain::new(mc, scheduler)
    }

    #[test]
    fn auto_reset_event_wakes_exactly_one_waiter() {
        let sd = new_sd();
        let event = EventUser::new(false, false);
        let timer = TimerService::start().unwrap();
        let timer_ref: &'static TimerService = Box::leak(Box::new(timer));
        let (tx, rx) = mpsc::channel();

        for _ in 0..2 {
            let event = event.clone();
            let tx = tx.clone();
            let ed = ExecutionDomain::new(64 * 1024);
            ed.install_runnable(Box::new(move || {
                let signalled = event.wait(StdDuration::from_millis(200), timer_ref).unwrap();
                tx.send(signalled).unwrap();
            }));
            ed.prepare().unwrap();
            ed.set_sync_context(SyncContext::Domain(sd.clone()));
            sd.schedule(crate::port::clock::now(), ed);
        }

        std::thread::sleep(StdDuration::from_millis(30));
        event.signal();

        let first = rx.recv_timeout(StdDuration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(StdDuration::from_secs(2)).unwrap();
        assert!(first);
        assert!(!second, "auto-reset event must only wake one waiter");
        sd.scheduler().shutdown();
    }

    #[test]
    fn manual_reset_event_stays_signalled_until_reset() {
        let event = EventUser::new(true, true);
        assert!(event.inner.waiter_count() == 0);
        event.reset();
        event.signal();
    }
}
