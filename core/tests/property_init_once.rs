//! Property 10 — InitOnce: for any number of concurrent `once(init_fn)`
//! callers, `init_fn` runs exactly once and every caller returns only
//! after it completes. Races callers across *different* sync-domains
//! (hence different worker threads) rather than one SD serializing
//! them, so the control word's CAS actually gets contended.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use nirvana_core::exec::domain::{ExecutionDomain, SyncContext};
use nirvana_core::heap::Heap;
use nirvana_core::memctx::{DeadlinePolicy, MemContext};
use nirvana_core::port::clock;
use nirvana_core::port::timer::TimerService;
use nirvana_core::scheduler::MasterScheduler;
use nirvana_core::sync_domain::SyncDomain;
use nirvana_core::wait::InitOnce;

#[test]
fn init_fn_runs_exactly_once_across_sync_domains() {
    let scheduler = MasterScheduler::start(6);
    let timer = TimerService::start().unwrap();
    let timer_ref: &'static TimerService = Box::leak(Box::new(timer));
    let control = Arc::new(InitOnce::new());
    static RUNS: AtomicU32 = AtomicU32::new(0);

    let (tx, rx) = mpsc::channel();
    const RACERS: usize = 12;
    for _ in 0..RACERS {
        let heap = Arc::new(Heap::new(64, 1024, 256));
        let mc = MemContext::new_core(heap, DeadlinePolicy::default());
        let sd = SyncDomain::new(mc, scheduler.clone());

        let control = control.clone();
        let tx = tx.clone();
        let ed = ExecutionDomain::new(64 * 1024);
        ed.install_runnable(Box::new(move || {
            control
                .once(
                    || {
                        RUNS.fetch_add(1, Ordering::SeqCst);
                    },
                    timer_ref,
                )
                .unwrap();
            tx.send(()).unwrap();
        }));
        ed.prepare().unwrap();
        ed.set_sync_context(SyncContext::Domain(sd.clone()));
        sd.schedule(clock::now(), ed);
    }

    for _ in 0..RACERS {
        rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
    }
    assert_eq!(RUNS.load(Ordering::SeqCst), 1);
    assert!(control.is_done());

    scheduler.shutdown();
}
