//! Synchronization domain (spec §4.5, component C7).
//!
//! Serialises calls that target the same serial region behind one
//! deadline-ordered priority queue: exactly one executor runs at a
//! time. Ported from `Source/SyncDomain.{h,cpp}`, `schedule()`'s
//! single-scheduling-thread-at-a-time loop and `execute()`'s
//! state-machine walk are close to direct translations; the
//! differences are hosted-std substitutions (a `SchedulerItem` handle
//! from `crate::scheduler` standing in for `Port::Scheduler`, and the
//! executor itself being an `Arc<ExecutionDomain>` rather than a
//! polymorphic `Executor*`).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::exec::domain::ExecutionDomain;
use crate::memctx::MemContext;
use crate::scheduler::{DispatchTarget, MasterScheduler, SchedulerItem};
use crate::skiplist::OrderedIndex;

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
enum State {
    Idle = 0,
    Scheduled = 1,
    Running = 2,
}

impl From<u8> for State {
    fn from(v: u8) -> Self {
        match v {
            0 => State::Idle,
            1 => State::Scheduled,
            _ => State::Running,
        }
    }
}

type QueueKey = (Instant, u64);

/// A serialised execution region (spec §3 "Sync-domain (SD)").
pub struct SyncDomain {
    mem_context: Arc<MemContext>,
    scheduler: Arc<MasterScheduler>,
    queue: OrderedIndex<QueueKey, Arc<ExecutionDomain>>,
    state: AtomicU8,
    /// `atomic_flag`-style "only one thread schedules at a time" lock,
    /// matching `SyncDomain::scheduling_` in the original.
    scheduling_lock: AtomicBool,
    need_schedule: AtomicBool,
    scheduled_deadline: Mutex<Option<Instant>>,
    /// Keeps the SD's scheduler item alive for as long as it has
    /// pending or in-flight work (spec §3 "activity counter keeping
    /// the SD alive while work is pending").
    activity: AtomicUsize,
    item: Arc<SchedulerItem>,
}

impl SyncDomain {
    pub fn new(mem_context: Arc<MemContext>, scheduler: Arc<MasterScheduler>) -> Arc<Self> {
        let item = scheduler.create_item(true);
        Arc::new(Self {
            mem_context,
            scheduler,
            queue: OrderedIndex::new(),
            state: AtomicU8::new(State::Idle as u8),
            scheduling_lock: AtomicBool::new(false),
            need_schedule: AtomicBool::new(false),
            scheduled_deadline: Mutex::new(None),
            activity: AtomicUsize::new(0),
            item,
        })
    }

    pub fn mem_context(&self) -> &Arc<MemContext> {
        &self.mem_context
    }

    pub fn scheduler(&self) -> &Arc<MasterScheduler> {
        &self.scheduler
    }

    fn state(&self) -> State {
        State::from(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, s: State) {
        self.state.store(s as u8, Ordering::Release);
    }

    fn activity_begin(&self) {
        self.activity.fetch_add(1, Ordering::AcqRel);
    }

    fn activity_end(&self) {
        self.activity.fetch_sub(1, Ordering::AcqRel);
    }

    /// `true` while this SD has pending or in-flight work keeping it alive.
    pub fn is_active(&self) -> bool {
        self.activity.load(Ordering::Acquire) > 0
    }

    /// Enqueues `ed` to run at `deadline` (spec §4.5 "Enqueue").
    pub fn schedule(self: &Arc<Self>, deadline: Instant, ed: Arc<ExecutionDomain>) {
        self.activity_begin();
        let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
        self.queue.upsert((deadline, seq), ed);
        self.schedule_step();
    }

    /// One pass of the "only one thread schedules at a time" loop
    /// (spec §4.5 "Schedule step"). Loops until no further work is
    /// owed, so a late insert racing a concurrent scheduling pass is
    /// never left unscheduled.
    fn schedule_step(self: &Arc<Self>) {
        self.need_schedule.store(true, Ordering::Release);
        while self.need_schedule.load(Ordering::Acquire)
            && self.state() != State::Running
            && !self.scheduling_lock.swap(true, Ordering::AcqRel)
        {
            self.need_schedule.store(false, Ordering::Release);
            if let Some(min_deadline) = self.min_deadline() {
                match self.state() {
                    State::Idle => {
                        self.set_state(State::Scheduled);
                        self.scheduler.schedule(
                            min_deadline,
                            self.item.clone(),
                            DispatchTarget::SyncDomain(self.clone()),
                        );
                        *self.scheduled_deadline.lock().unwrap() = Some(min_deadline);
                    }
                    State::Scheduled => {
                        let prev = *self.scheduled_deadline.lock().unwrap();
                        if let Some(prev) = prev {
                            if min_deadline != prev
                                && self.scheduler.reschedule(min_deadline, &self.item, prev)
                            {
                                *self.scheduled_deadline.lock().unwrap() = Some(min_deadline);
                            }
                        }
                    }
                    State::Running => {}
                }
            }
            self.scheduling_lock.store(false, Ordering::Release);
        }
    }

    fn min_deadline(&self) -> Option<Instant> {
        // `OrderedIndex` has no peek-only probe; a skip list's
        // bottom-level walk to find the head is cheap enough that
        // popping and immediately re-inserting the same entry is an
        // acceptable substitute for a dedicated "peek min" operation.
        let (key, ed) = self.queue.delete_min()?;
        self.queue.upsert(key, ed);
        Some(key.0)
    }

    /// Called by the master scheduler on a worker, in neutral context
    /// (spec §4.5 "Execute"). Runs exactly one executor from the head
    /// of the queue, then re-enters the scheduling loop.
    pub fn execute(self: &Arc<Self>) {
        debug_assert_eq!(self.state(), State::Scheduled);
        self.set_state(State::Running);
        if let Some((_, ed)) = self.queue.delete_min() {
            self.run_one(ed);
        }
        self.set_state(State::Idle);
        self.activity_end();
        self.schedule_step();
    }

    fn run_one(self: &Arc<Self>, ed: Arc<ExecutionDomain>) {
        ed.set_sync_context(crate::exec::domain::SyncContext::Domain(self.clone()));
        if let Err(err) = ed.drive() {
            log::error!("sync domain: execution domain {} failed to drive: {err}", ed.id());
        }
    }

    /// Direct re-entry: a return into the *same* SD by the executor
    /// that is currently running it can skip the full enqueue round
    /// trip (spec §4.5 "Re-entry policy"). Only valid while this SD is
    /// `Running` and the caller is in fact the ED occupying that slot
    ///, callers must only use this from `schedule_return`'s
    /// `no_reschedule` path.
    pub fn reenter_direct(&self) -> bool {
        self.state() == State::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;
    use crate::memctx::DeadlinePolicy;
    use std::sync::mpsc;
    use std::time::Duration;

    fn new_sd() -> Arc<SyncDomain> {
        let heap = Arc::new(Heap::new(64, 1024, 256));
        let mc = MemContext::new_core(heap, DeadlinePolicy::default());
        let scheduler = MasterScheduler::start(1);
        SyncDomain::new(mc, scheduler)
    }

    #[test]
    fn runs_a_single_scheduled_executor() {
        let sd = new_sd();
        let ed = ExecutionDomain::new(64 * 1024);
        let (tx, rx) = mpsc::channel();
        ed.install_runnable(Box::new(move || {
            tx.send(()).unwrap();
        }));
        ed.prepare().unwrap();
        sd.schedule(Instant::now(), ed);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        sd.scheduler.shutdown();
    }

    #[test]
    fn runs_executors_in_deadline_order() {
        // Scenario S4: enqueue out of order while idle, observe
        // in-order completion.
        let sd = new_sd();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();
        let now = Instant::now();
        for (i, offset_ms) in [5u64, 1, 3, 2, 4].into_iter().enumerate() {
            let ed = ExecutionDomain::new(64 * 1024);
            let order = order.clone();
            let tx = tx.clone();
            let is_last = i == 4;
            ed.install_runnable(Box::new(move || {
                order.lock().unwrap().push(offset_ms);
                if is_last {
                    // Not reliable ordering of "last scheduled", but we
                    // signal completion count below instead.
                }
                tx.send(()).unwrap();
            }));
            ed.prepare().unwrap();
            sd.schedule(now + Duration::from_millis(offset_ms), ed);
        }
        for _ in 0..5 {
            rx.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        sd.scheduler.shutdown();
    }
}
