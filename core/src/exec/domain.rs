//! Execution domain (spec §3 "Execution domain (ED)", §4.4).
//!
//! An ED is a stackful coroutine plus the bookkeeping it carries while
//! it runs: a deadline, a stack of mem-contexts (pushed on sync-call,
//! popped on return), its current sync-context, a runnable slot,
//! per-domain TLS, an impersonation context, and the suspend/resume
//! latch used by wait primitives.
//!
//! `corosensei` cannot rearm a completed coroutine, so, unlike the
//! design this is modelled on, which reuses one OS fiber across many
//! calls, each call an ED services gets its own freshly built
//! [`Fiber`]; what the execution-domain object pool (`crate::pools`)
//! actually recycles is this struct's bookkeeping (TLS map, mem-context
//! stack's backing `Vec`), not the coroutine stack itself. Recorded as
//! a deliberate substitution in the accompanying design notes.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::{CoreError, CoreResult};
use crate::memctx::MemContext;
use crate::pools::Pool;
use crate::port::clock;
use crate::port::fiber::{Fiber, Resume};
use crate::port::security::SecurityContext;
use crate::scheduler::{DispatchTarget, MasterScheduler};
use crate::sync_domain::SyncDomain;

use super::neutral;
use super::runnable::Runnable;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Raw pointer to the runnable currently executing inside `run()`,
/// kept so the crash path (`ExecutionDomain::crash`) can reach
/// `on_crash` without taking ownership back from `run(self: Box<Self>)`,
/// which is still on the stack when a fault arrives: the boxed
/// allocation's address stays put even though the `Box` wrapper itself
/// moves into `run`. Valid to dereference only while that same `run()`
/// call is still active on this thread, true for the signal-delivered
/// crash path since delivery is synchronous on the faulting thread.
struct ActiveRunnable(*const dyn Runnable);
unsafe impl Send for ActiveRunnable {}

/// Where an execution domain currently runs (spec §3 "Sync-context").
#[derive(Clone)]
pub enum SyncContext {
    /// No serialisation; uses the caller's mem-context and the
    /// process-wide shared heap.
    Free,
    /// Serialised behind one synchronization domain.
    Domain(Arc<SyncDomain>),
    /// A loaded executable's entry point.
    Process(u64),
    /// One dedicated worker thread, no serialisation.
    LegacyThread(std::thread::ThreadId),
}

impl SyncContext {
    pub fn domain(&self) -> Option<&Arc<SyncDomain>> {
        match self {
            SyncContext::Domain(sd) => Some(sd),
            _ => None,
        }
    }
}

pub struct ExecutionDomain {
    id: u64,
    stack_size: usize,
    fiber: Mutex<Option<Fiber>>,
    deadline: Mutex<Instant>,
    mem_context_stack: Mutex<Vec<Arc<MemContext>>>,
    sync_context: Mutex<SyncContext>,
    runnable_slot: Mutex<Option<Box<dyn Runnable>>>,
    tls: Mutex<HashMap<u32, Box<dyn Any + Send>>>,
    impersonation: Mutex<SecurityContext>,
    /// Set exactly once per suspension by `suspend_prepare`, cleared
    /// exactly once by whichever of `suspend_prepared` or
    /// `suspend_unprepare` runs (spec §9 Open Questions).
    suspend_latch: AtomicBool,
    /// Set by `signal_resume` if a resume arrives while the latch is
    /// held but before `suspend_prepared` has actually yielded.
    /// Closes the race in Property 9 / scenario S6.
    resume_pending: AtomicBool,
    /// Set for the duration of `run()`, cleared once it returns; lets
    /// `crash()` dispatch `on_crash` without owning the runnable.
    active_runnable: Mutex<Option<ActiveRunnable>>,
    /// Set by `resume_with_exception`, consumed by whatever wakes next
    /// at the resume point (spec §6 Execution API `resume(ed, exception)`).
    pending_exception: Mutex<Option<CoreError>>,
}

impl ExecutionDomain {
    pub fn new(stack_size: usize) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            stack_size,
            fiber: Mutex::new(None),
            deadline: Mutex::new(clock::now()),
            mem_context_stack: Mutex::new(Vec::new()),
            sync_context: Mutex::new(SyncContext::Free),
            runnable_slot: Mutex::new(None),
            tls: Mutex::new(HashMap::new()),
            impersonation: Mutex::new(SecurityContext::anonymous()),
            suspend_latch: AtomicBool::new(false),
            resume_pending: AtomicBool::new(false),
            active_runnable: Mutex::new(None),
            pending_exception: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap()
    }

    pub fn set_deadline(&self, deadline: Instant) {
        *self.deadline.lock().unwrap() = deadline;
    }

    pub fn push_mem_context(&self, mc: Arc<MemContext>) {
        self.mem_context_stack.lock().unwrap().push(mc);
    }

    pub fn pop_mem_context(&self) -> Option<Arc<MemContext>> {
        self.mem_context_stack.lock().unwrap().pop()
    }

    pub fn current_mem_context(&self) -> Option<Arc<MemContext>> {
        self.mem_context_stack.lock().unwrap().last().cloned()
    }

    pub fn sync_context(&self) -> SyncContext {
        self.sync_context.lock().unwrap().clone()
    }

    pub fn set_sync_context(&self, ctx: SyncContext) {
        *self.sync_context.lock().unwrap() = ctx;
    }

    pub fn set_impersonation_context(&self, ctx: SecurityContext) {
        *self.impersonation.lock().unwrap() = ctx;
    }

    pub fn impersonation_context(&self) -> SecurityContext {
        *self.impersonation.lock().unwrap()
    }

    pub fn tls_set(&self, slot: u32, value: Box<dyn Any + Send>) {
        self.tls.lock().unwrap().insert(slot, value);
    }

    pub fn tls_take(&self, slot: u32) -> Option<Box<dyn Any + Send>> {
        self.tls.lock().unwrap().remove(&slot)
    }

    /// Installs the runnable this ED will execute on its next `prepare`.
    pub fn install_runnable(&self, runnable: Box<dyn Runnable>) {
        *self.runnable_slot.lock().unwrap() = Some(runnable);
    }

    /// Builds a fresh coroutine around whatever runnable is currently
    /// installed. Must be called before the first `drive()`.
    pub fn prepare(self: &Arc<Self>) -> std::io::Result<()> {
        let ed = self.clone();
        let fiber = Fiber::new(self.stack_size, move |yielder| {
            let _yielder_guard = neutral::install_yielder(yielder);
            let _mount_guard = neutral::mount(ed.clone());
            let runnable = ed.runnable_slot.lock().unwrap().take();
            if let Some(runnable) = runnable {
                // Captured before `run()` consumes the box by value:
                // the boxed allocation's address is stable even though
                // ownership of the `Box` wrapper moves into `run`, so
                // `crash()` can still reach `on_crash` through this
                // pointer while the call below is on the stack.
                let raw: *const dyn Runnable = Box::as_ref(&runnable);
                *ed.active_runnable.lock().unwrap() = Some(ActiveRunnable(raw));
                let panicked =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| runnable.run())).is_err();
                ed.active_runnable.lock().unwrap().take();
                if panicked {
                    log::error!("execution domain {} runnable panicked", ed.id);
                }
            }
        })?;
        *self.fiber.lock().unwrap() = Some(fiber);
        Ok(())
    }

    /// `true` once a runnable has been installed and `prepare` has
    /// built a coroutine for it.
    pub fn is_prepared(&self) -> bool {
        self.fiber.lock().unwrap().is_some()
    }

    /// Drives the prepared coroutine one step: runs until it either
    /// suspends (a wait primitive called `suspend_current`) or
    /// completes. Only the worker thread currently holding dispatch
    /// for this ED may call this.
    pub fn drive(self: &Arc<Self>) -> CoreResult<Resume> {
        let mut guard = self.fiber.lock().unwrap();
        let fiber = guard.as_mut().ok_or(CoreError::BadOrder)?;
        let outcome = fiber.resume();
        if matches!(outcome, Resume::Completed) {
            *guard = None;
        }
        Ok(outcome)
    }

    /// Sets the suspend-prepared latch. Fails with `BAD_ORDER` on a
    /// double prepare.
    pub fn suspend_prepare(&self) -> CoreResult<()> {
        if self.suspend_latch.swap(true, Ordering::AcqRel) {
            return Err(CoreError::BadOrder);
        }
        Ok(())
    }

    /// Actually yields back to neutral, unless a `signal_resume`
    /// already arrived while the latch was held, in which case this
    /// returns immediately without suspending (closes the S6 race).
    pub fn suspend_prepared(&self) {
        if self.resume_pending.swap(false, Ordering::AcqRel) {
            self.suspend_latch.store(false, Ordering::Release);
            return;
        }
        neutral::suspend_current();
        self.resume_pending.store(false, Ordering::Release);
        self.suspend_latch.store(false, Ordering::Release);
    }

    /// Aborts a prepare window without suspending (exception path).
    pub fn suspend_unprepare(&self) {
        self.resume_pending.store(false, Ordering::Release);
        self.suspend_latch.store(false, Ordering::Release);
    }

    /// Idempotent wake-up signal. Safe to call whether or not the
    /// target has reached `suspend_prepared` yet.
    pub fn signal_resume(&self) {
        self.resume_pending.store(true, Ordering::Release);
    }

    pub fn is_suspend_prepared(&self) -> bool {
        self.suspend_latch.load(Ordering::Acquire)
    }

    /// Sync-call (spec §4.4 "Sync-call", §6 Execution API
    /// `schedule_call`). Pushes a fresh mem-context onto this ED's
    /// stack and hands the ED to `target`: enqueued behind `target`'s
    /// synchronization domain if it has one, otherwise the ED simply
    /// keeps running under `target`'s sync-context with no queueing
    /// (ported from `Source/ScheduleCall.{h,cpp}`'s push-then-dispatch
    /// shape; `FREE`/`Process`/`LegacyThread` targets have no queue to
    /// enqueue behind, so the switch there is a plain context-swap).
    /// Any partial work (the pushed mem-context) is undone before the
    /// error becomes visible to the caller.
    pub fn schedule_call(self: &Arc<Self>, target: SyncContext) -> CoreResult<()> {
        let mem_context = match &target {
            SyncContext::Domain(sd) => sd.mem_context().clone(),
            _ => self.current_mem_context().ok_or(CoreError::BadOrder)?,
        };
        self.push_mem_context(mem_context);
        if let Err(err) = self.schedule_call_no_push_mem(target) {
            self.pop_mem_context();
            return Err(err);
        }
        Ok(())
    }

    fn schedule_call_no_push_mem(self: &Arc<Self>, target: SyncContext) -> CoreResult<()> {
        if !neutral::can_suspend() {
            return Err(CoreError::BadOrder);
        }
        self.set_sync_context(target.clone());
        if let SyncContext::Domain(sd) = &target {
            sd.schedule(self.deadline(), self.clone());
            neutral::suspend_current();
        }
        Ok(())
    }

    /// Sync-return (spec §4.4 "Sync-return", §4.5 "Re-entry policy",
    /// §6 Execution API `schedule_return`). Pops the callee's
    /// mem-context and re-enters `target`. When `no_reschedule` is set
    /// and `target` is a synchronization domain this same executor is
    /// already running, the enqueue round trip is elided entirely via
    /// [`SyncDomain::reenter_direct`] (ported from
    /// `Source/ScheduleReturn.cpp`'s direct-return fast path);
    /// otherwise this behaves exactly like `schedule_call` into
    /// `target`, minus the mem-context push.
    pub fn schedule_return(self: &Arc<Self>, target: SyncContext, no_reschedule: bool) -> CoreResult<()> {
        self.pop_mem_context().ok_or(CoreError::BadOrder)?;
        self.set_sync_context(target.clone());
        match &target {
            SyncContext::Domain(sd) if no_reschedule && sd.reenter_direct() => {}
            SyncContext::Domain(sd) => {
                sd.schedule(self.deadline(), self.clone());
                neutral::suspend_current();
            }
            _ => {}
        }
        Ok(())
    }

    /// Re-enters the current synchronization domain's queue behind any
    /// other work at this ED's deadline, then suspends until picked
    /// back up (spec §6 Execution API `reschedule()`). A no-op
    /// (`Ok(false)`) outside a synchronization domain, there is no
    /// queue to re-enter.
    pub fn reschedule(self: &Arc<Self>) -> CoreResult<bool> {
        let sd = match self.sync_context().domain().cloned() {
            Some(sd) => sd,
            None => return Ok(false),
        };
        if !neutral::can_suspend() {
            return Err(CoreError::BadOrder);
        }
        self.suspend_prepare()?;
        sd.schedule(self.deadline(), self.clone());
        self.suspend_prepared();
        Ok(true)
    }

    /// Suspends this execution domain with no particular resume
    /// context recorded (spec §6 Execution API `suspend()`): the
    /// convenience composition of `suspend_prepare` + `suspend_prepared`
    /// for callers that don't need the split prepare/commit window a
    /// wait primitive uses to register itself before yielding.
    pub fn suspend(self: &Arc<Self>) -> CoreResult<()> {
        self.suspend_prepare()?;
        self.suspend_prepared();
        Ok(())
    }

    /// Resumes a suspended execution domain (spec §6 Execution API
    /// `resume(ed)`). Re-enqueues `ed` into whichever context it is
    /// currently serialised behind so a worker actually re-drives its
    /// fiber, the same `signal_resume` + re-enqueue sequence
    /// `wait::event_sync_timeout`'s waiter already performs ad hoc for
    /// the sync-domain case, generalised here to the `FREE`/`Process`/
    /// `LegacyThread` sync-contexts via the master scheduler directly.
    pub fn resume(self: &Arc<Self>, scheduler: &Arc<MasterScheduler>) {
        self.signal_resume();
        match self.sync_context() {
            SyncContext::Domain(sd) => sd.schedule(self.deadline(), self.clone()),
            _ => {
                let item = scheduler.create_item(false);
                scheduler.schedule(self.deadline(), item, DispatchTarget::Domain(self.clone()));
            }
        }
    }

    /// Like `resume`, but records `exception` for whatever wakes at the
    /// resume point to retrieve via `take_pending_exception` (spec §6
    /// Execution API `resume(ed, exception)`).
    pub fn resume_with_exception(self: &Arc<Self>, scheduler: &Arc<MasterScheduler>, exception: CoreError) {
        *self.pending_exception.lock().unwrap() = Some(exception);
        self.resume(scheduler);
    }

    /// Takes whatever exception a `resume_with_exception` call left for
    /// this ED's resume point to observe.
    pub fn take_pending_exception(&self) -> Option<CoreError> {
        self.pending_exception.lock().unwrap().take()
    }

    /// Runs the crash path for this execution domain (spec §4.4
    /// "Crash", §7: crashes do not propagate across EDs). Leaves any
    /// synchronization domain, unwinds the mem-context stack, and
    /// dispatches `on_crash` to whichever runnable was active; with no
    /// runnable active (a crash inside the scheduler's own bookkeeping,
    /// say) the unrecoverable-error hook runs instead. Called from the
    /// port's `SIGSEGV`/`SIGBUS` handler on the faulting thread, so this
    /// must not touch `self.fiber`, that mutex is already held by the
    /// `drive()` call the fault interrupted.
    pub fn crash(self: &Arc<Self>, signal: i32) {
        self.set_sync_context(SyncContext::Free);
        while self.pop_mem_context().is_some() {}
        let active = self.active_runnable.lock().unwrap().take();
        match active {
            Some(ActiveRunnable(ptr)) => {
                // Safety: see `ActiveRunnable`'s doc. Crash delivery is
                // synchronous on this thread, inside the `run()` call
                // that installed this pointer.
                let runnable: &dyn Runnable = unsafe { &*ptr };
                runnable.on_crash(signal);
            }
            None => crate::port::signal::unrecoverable_error(signal),
        }
    }

    /// Clears per-call state before a pooled execution domain is
    /// handed out again (spec §4.8, `ObjectPool::create`): the previous
    /// call's fiber, mem-context stack, sync-context, TLS, and
    /// impersonation context must not leak into the next occupant.
    fn reset(&self) {
        *self.fiber.lock().unwrap() = None;
        self.mem_context_stack.lock().unwrap().clear();
        *self.sync_context.lock().unwrap() = SyncContext::Free;
        self.tls.lock().unwrap().clear();
        *self.impersonation.lock().unwrap() = SecurityContext::anonymous();
        self.suspend_latch.store(false, Ordering::Release);
        self.resume_pending.store(false, Ordering::Release);
        *self.pending_exception.lock().unwrap() = None;
        *self.active_runnable.lock().unwrap() = None;
        *self.runnable_slot.lock().unwrap() = None;
    }

    fn spawn(self: &Arc<Self>, target: SyncContext, scheduler: &Arc<MasterScheduler>) {
        self.set_sync_context(target.clone());
        match target {
            SyncContext::Domain(sd) => sd.schedule(self.deadline(), self.clone()),
            _ => {
                let item = scheduler.create_item(false);
                scheduler.schedule(self.deadline(), item, DispatchTarget::Domain(self.clone()));
            }
        }
    }

    /// Async-call (spec §4.4 "Async-call", §6 Execution API
    /// `async_call`): obtains an execution domain from `pool` (building
    /// one if empty), installs `runnable` and its initial mem-context,
    /// sets `deadline`, and spawns it into `target` without waiting for
    /// it to run. Ported from `ExecDomain.h`'s static `async_call`,
    /// which does the same pool-acquire-then-dispatch sequence.
    pub fn async_call(
        pool: &Pool<ExecutionDomain>,
        scheduler: &Arc<MasterScheduler>,
        deadline: Instant,
        runnable: Box<dyn Runnable>,
        target: SyncContext,
        mem_context: Arc<MemContext>,
    ) -> std::io::Result<Arc<ExecutionDomain>> {
        let ed = pool.create();
        ed.reset();
        ed.set_deadline(deadline);
        ed.push_mem_context(mem_context);
        ed.install_runnable(runnable);
        ed.prepare()?;
        ed.spawn(target, scheduler);
        Ok(ed)
    }

    /// Starts a fresh, unpooled execution domain as a process entry
    /// point (spec §4.4 "Start-process", §6 Execution API
    /// `start_process`). Unlike `async_call`, a process's ED is never
    /// recycled through the pool, it runs for the lifetime of the
    /// process it represents.
    pub fn start_process(
        stack_size: usize,
        scheduler: &Arc<MasterScheduler>,
        runnable: Box<dyn Runnable>,
        target: SyncContext,
        mem_context: Arc<MemContext>,
    ) -> std::io::Result<Arc<ExecutionDomain>> {
        let ed = ExecutionDomain::new(stack_size);
        ed.push_mem_context(mem_context);
        ed.install_runnable(runnable);
        ed.prepare()?;
        ed.spawn(target, scheduler);
        Ok(ed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc;
    use std::time::Duration;

    use crate::heap::Heap;
    use crate::memctx::DeadlinePolicy;
    use crate::scheduler::DispatchTarget;

    fn new_mem_context() -> Arc<MemContext> {
        let heap = Arc::new(Heap::new(64, 1024, 256));
        MemContext::new_core(heap, DeadlinePolicy::default())
    }

    #[test]
    fn runs_a_simple_runnable_to_completion() {
        let ed = ExecutionDomain::new(256 * 1024);
        static HITS: AtomicU32 = AtomicU32::new(0);
        ed.install_runnable(Box::new(|| {
            HITS.fetch_add(1, Ordering::SeqCst);
        }));
        ed.prepare().unwrap();
        assert!(matches!(ed.drive().unwrap(), Resume::Completed));
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
        assert!(!ed.is_prepared());
    }

    #[test]
    fn suspend_then_resume_continues_the_same_runnable() {
        let ed = Arc::clone(&ExecutionDomain::new(256 * 1024));
        static PHASE: AtomicU32 = AtomicU32::new(0);
        let ed_for_runnable = ed.clone();
        ed.install_runnable(Box::new(move || {
            PHASE.store(1, Ordering::SeqCst);
            ed_for_runnable.suspend_prepare().unwrap();
            ed_for_runnable.suspend_prepared();
            PHASE.store(2, Ordering::SeqCst);
        }));
        ed.prepare().unwrap();
        assert!(matches!(ed.drive().unwrap(), Resume::Suspended));
        assert_eq!(PHASE.load(Ordering::SeqCst), 1);
        ed.signal_resume();
        assert!(matches!(ed.drive().unwrap(), Resume::Completed));
        assert_eq!(PHASE.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn resume_before_suspend_prepared_is_not_lost() {
        // Scenario S6: the resume arrives inside the prepare window,
        // before `suspend_prepared` itself runs.
        let ed = ExecutionDomain::new(256 * 1024);
        let ed2 = ed.clone();
        ed.install_runnable(Box::new(move || {
            ed2.suspend_prepare().unwrap();
            ed2.signal_resume(); // simulates another ED's resume() landing here
            ed2.suspend_prepared();
        }));
        ed.prepare().unwrap();
        // Because the resume is already pending by the time
        // `suspend_prepared` runs, the fiber must not actually yield.
        assert!(matches!(ed.drive().unwrap(), Resume::Completed));
    }

    #[test]
    fn schedule_call_then_direct_return_round_trips_through_a_sync_domain() {
        let mc = new_mem_context();
        let scheduler = MasterScheduler::start(1);
        let sd = SyncDomain::new(mc.clone(), scheduler.clone());

        let caller = ExecutionDomain::new(64 * 1024);
        caller.push_mem_context(mc.clone());
        let (tx, rx) = mpsc::channel();
        let sd_for_call = sd.clone();
        let sd_for_return = sd.clone();
        let caller_for_call = caller.clone();
        caller.install_runnable(Box::new(move || {
            caller_for_call
                .schedule_call(SyncContext::Domain(sd_for_call.clone()))
                .unwrap();
            assert!(matches!(caller_for_call.sync_context(), SyncContext::Domain(_)));
            // `sd_for_return` is still `Running` (we're still on the
            // stack `SyncDomain::execute` drove us in from), so a
            // reentrant return into it takes the direct path and must
            // not suspend: the fiber runs straight through to `tx.send`.
            caller_for_call
                .schedule_return(SyncContext::Domain(sd_for_return), true)
                .unwrap();
            assert!(matches!(caller_for_call.sync_context(), SyncContext::Domain(_)));
            tx.send(()).unwrap();
        }));
        caller.prepare().unwrap();
        let item = scheduler.create_item(false);
        scheduler.schedule(Instant::now(), item, DispatchTarget::Domain(caller));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        scheduler.shutdown();
    }

    #[test]
    fn schedule_call_undoes_the_mem_context_push_on_failure() {
        // Outside a running fiber, `can_suspend()` is false, so the
        // hand-off into the domain must fail and leave no trace of the
        // attempted push.
        let mc = new_mem_context();
        let scheduler = MasterScheduler::start(0);
        let sd = SyncDomain::new(mc.clone(), scheduler.clone());
        let ed = ExecutionDomain::new(64 * 1024);
        ed.push_mem_context(mc.clone());
        assert!(ed.schedule_call(SyncContext::Domain(sd)).is_err());
        assert_eq!(ed.mem_context_stack.lock().unwrap().len(), 1);
        scheduler.shutdown();
    }

    #[test]
    fn reschedule_outside_a_sync_domain_is_a_no_op() {
        let ed = ExecutionDomain::new(64 * 1024);
        let ed2 = ed.clone();
        ed.install_runnable(Box::new(move || {
            assert_eq!(ed2.reschedule().unwrap(), false);
        }));
        ed.prepare().unwrap();
        assert!(matches!(ed.drive().unwrap(), Resume::Completed));
    }

    #[test]
    fn resume_with_exception_is_observable_at_the_resume_point() {
        let ed = Arc::clone(&ExecutionDomain::new(64 * 1024));
        let ed2 = ed.clone();
        ed.install_runnable(Box::new(move || {
            ed2.suspend_prepare().unwrap();
            ed2.suspend_prepared();
            assert_eq!(ed2.take_pending_exception(), Some(CoreError::Cancelled));
        }));
        ed.prepare().unwrap();
        assert!(matches!(ed.drive().unwrap(), Resume::Suspended));
        let scheduler = MasterScheduler::start(0);
        ed.resume_with_exception(&scheduler, CoreError::Cancelled);
        assert!(matches!(ed.drive().unwrap(), Resume::Completed));
        scheduler.shutdown();
    }

    #[test]
    fn crash_dispatches_on_crash_to_the_active_runnable() {
        use std::sync::atomic::AtomicI32;

        struct Recorder(Arc<AtomicI32>);
        impl Runnable for Recorder {
            fn run(self: Box<Self>) {}
            fn on_crash(&self, signal: i32) {
                self.0.store(signal, Ordering::SeqCst);
            }
        }

        let ed = ExecutionDomain::new(64 * 1024);
        ed.push_mem_context(new_mem_context());
        let seen = Arc::new(AtomicI32::new(0));
        let runnable: Box<dyn Runnable> = Box::new(Recorder(seen.clone()));
        let raw: *const dyn Runnable = Box::as_ref(&runnable);
        // Stands in for what `prepare`'s entry closure installs right
        // before calling `run()`.
        *ed.active_runnable.lock().unwrap() = Some(ActiveRunnable(raw));

        ed.crash(11);

        assert_eq!(seen.load(Ordering::SeqCst), 11);
        assert!(ed.current_mem_context().is_none());
        assert!(matches!(ed.sync_context(), SyncContext::Free));
        drop(runnable);
    }

    #[test]
    fn crash_with_no_active_runnable_calls_the_unrecoverable_hook() {
        let ed = ExecutionDomain::new(64 * 1024);
        ed.push_mem_context(new_mem_context());
        ed.crash(11);
        assert!(ed.current_mem_context().is_none());
    }
}
