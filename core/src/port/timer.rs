//! One-shot timer port (spec §6 Port surface: "timers").
//!
//! Backs [`crate::wait::event_sync_timeout`] and the master scheduler's
//! deadline queue. A single background thread owns a min-heap of armed
//! timers ordered by deadline and sleeps on a condition variable until
//! either the earliest one expires or a new, sooner timer is armed.
//! This is the hosted-std substitute for the original port surface's
//! OS timer queue; the external contract (arm/cancel by opaque handle,
//! fire-at-or-after deadline, best-effort ordering among equal
//! deadlines) is unchanged.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use super::thread;

/// Opaque handle returned by [`TimerService::set`], passed back to
/// [`TimerService::cancel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

type Callback = Box<dyn FnOnce() + Send>;

struct Armed {
    deadline: Instant,
    handle: TimerHandle,
    callback: Option<Callback>,
}

impl PartialEq for Armed {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.handle == other.handle
    }
}
impl Eq for Armed {}

impl PartialOrd for Armed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Armed {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed so `BinaryHeap` (a max-heap) pops the earliest deadline.
        other.deadline.cmp(&self.deadline)
    }
}

struct Shared {
    heap: Mutex<BinaryHeap<Armed>>,
    cancelled: Mutex<std::collections::HashSet<u64>>,
    cv: Condvar,
    shutdown: std::sync::atomic::AtomicBool,
}

/// A running timer thread plus the means to arm and cancel timers on it.
pub struct TimerService {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    _worker: std::thread::JoinHandle<()>,
}

impl TimerService {
    pub fn start() -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            cancelled: Mutex::new(std::collections::HashSet::new()),
            cv: Condvar::new(),
            shutdown: std::sync::atomic::AtomicBool::new(false),
        });
        let worker_shared = shared.clone();
        let worker = thread::spawn_worker("nirvana-timer", move || run(worker_shared))?;
        Ok(Self {
            shared,
            next_id: AtomicU64::new(1),
            _worker: worker,
        })
    }

    /// Arms a one-shot timer that invokes `callback` once `now() >= deadline`.
    pub fn set(&self, deadline: Instant, callback: impl FnOnce() + Send + 'static) -> TimerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = TimerHandle(id);
        {
            let mut heap = self.shared.heap.lock().unwrap();
            heap.push(Armed {
                deadline,
                handle,
                callback: Some(Box::new(callback)),
            });
        }
        // Wake the worker unconditionally; it re-checks the true minimum
        // under the lock, so a spurious wake here just costs one extra loop.
        self.shared.cv.notify_one();
        handle
    }

    /// Cancels a timer before it fires. Returns `false` if it already
    /// fired or was already cancelled.
    pub fn cancel(&self, handle: TimerHandle) -> bool {
        let mut cancelled = self.shared.cancelled.lock().unwrap();
        cancelled.insert(handle.0)
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        self.shared.cv.notify_all();
    }
}

fn run(shared: Arc<Shared>) {
    loop {
        let mut heap = shared.heap.lock().unwrap();
        loop {
            if shared.shutdown.load(Ordering::SeqCst) {
                return;
            }
            match heap.peek() {
                None => {
                    heap = shared.cv.wait(heap).unwrap();
                }
                Some(top) => {
                    let now = Instant::now();
                    if top.deadline <= now {
                        break;
                    }
                    let (guard, timeout) = shared
                        .cv
                        .wait_timeout(heap, top.deadline - now)
                        .unwrap();
                    heap = guard;
                    let _ = timeout;
                }
            }
        }
        let mut fired = heap.pop();
        drop(heap);
        if let Some(armed) = &mut fired {
            let is_cancelled = shared.cancelled.lock().unwrap().remove(&armed.handle.0);
            if !is_cancelled {
                if let Some(cb) = armed.callback.take() {
                    cb();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn fires_after_deadline() {
        let svc = TimerService::start().unwrap();
        let (tx, rx) = mpsc::channel();
        svc.set(Instant::now() + Duration::from_millis(20), move || {
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
    }

    #[test]
    fn cancel_suppresses_callback() {
        let svc = TimerService::start().unwrap();
        let (tx, rx) = mpsc::channel::<()>();
        let handle = svc.set(Instant::now() + Duration::from_millis(50), move || {
            tx.send(()).unwrap();
        });
        assert!(svc.cancel(handle));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn earlier_timer_preempts_the_wait() {
        let svc = TimerService::start().unwrap();
        let (tx, rx) = mpsc::channel();
        svc.set(Instant::now() + Duration::from_secs(5), || ());
        svc.set(Instant::now() + Duration::from_millis(10), move || {
            tx.send("fast").unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "fast");
    }
}
