//! Async timer bridge (spec §4.6 "Timers", supplemented feature).
//!
//! A `TimerService` callback runs on the timer port's own background
//! thread (`crate::port::timer`), which must never itself execute
//! arbitrary user code, it isn't a worker thread and has no mem-context
//! or sync-context of its own. `AsyncTimer` is the bridge: arming one
//! schedules, at the armed deadline, an `async_call` into the master
//! scheduler instead of running anything inline on the timer thread.

use std::sync::Arc;
use std::time::Instant;

use crate::exec::domain::ExecutionDomain;
use crate::port::timer::{TimerHandle, TimerService};
use crate::scheduler::{DispatchTarget, MasterScheduler};

/// Couples a [`TimerService`] to a [`MasterScheduler`] so armed
/// deadlines turn into scheduler dispatches rather than inline timer-
/// thread calls.
pub struct AsyncTimer {
    timer: Arc<TimerService>,
    scheduler: Arc<MasterScheduler>,
}

impl AsyncTimer {
    pub fn new(timer: Arc<TimerService>, scheduler: Arc<MasterScheduler>) -> Self {
        Self { timer, scheduler }
    }

    /// Arms `ed` to be resumed at `deadline` in the `FREE` sync-context,
    /// via the master scheduler rather than directly on the timer
    /// thread (spec §4.6 "Timers").
    pub fn schedule_resume(&self, deadline: Instant, ed: Arc<ExecutionDomain>) -> TimerHandle {
        let scheduler = self.scheduler.clone();
        self.timer.set(deadline, move || {
            let item = scheduler.create_item(false);
            scheduler.schedule(deadline, item, DispatchTarget::Domain(ed));
        })
    }

    pub fn cancel(&self, handle: TimerHandle) -> bool {
        self.timer.cancel(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn fired_timer_resumes_the_domain_through_the_scheduler() {
        let timer = Arc::new(TimerService::start().unwrap());
        let scheduler = MasterScheduler::start(1);
        let bridge = AsyncTimer::new(timer, scheduler.clone());

        let ed = ExecutionDomain::new(64 * 1024);
        let (tx, rx) = mpsc::channel();
        ed.install_runnable(Box::new(move || {
            tx.send(()).unwrap();
        }));
        ed.prepare().unwrap();

        bridge.schedule_resume(Instant::now() + Duration::from_millis(20), ed);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        scheduler.shutdown();
    }
}
