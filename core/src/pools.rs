//! Bounded object pools (spec §4.8, component C10).
//!
//! Execution domains and skip-list/queue nodes are created and torn
//! down constantly on the request path; `ObjectPool` in the original
//! design amortises that churn with a per-pool freelist plus a shared
//! housekeeping timer that periodically shrinks pools sitting on idle
//! capacity. The freelist itself is a plain `parking_lot::Mutex<Vec<_>>`
//! here rather than a hand-rolled lock-free stack: pool push/pop sits
//! off the hot allocation path (the heap and skip list already cover
//! that), so a short-held mutex is the better trade against unverifiable
//! unsafe stack-splicing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::port::timer::TimerService;

/// A bounded pool of `Arc<T>`, built by `factory` on demand.
///
/// Mirrors `Source/ObjectPool.h`'s `ObjectPool<Ref<T>>` specialisation:
/// `create()` pops a recycled instance or builds a fresh one; `release()`
/// returns an instance to the pool, dropping it outright once the pool
/// is at capacity; `shrink()` is the housekeeping timer's per-tick call.
pub struct Pool<T> {
    capacity: usize,
    factory: Box<dyn Fn() -> Arc<T> + Send + Sync>,
    free: Mutex<Vec<Arc<T>>>,
    /// Toggled by `shrink()` (`ObjectPoolCleanup::shrink`/`bottom`): the
    /// first housekeeping tick after the pool last ran dry just arms
    /// the flag, the next tick actually evicts one idle entry. A fresh
    /// `create()` that has to fall through to `factory` means the pool
    /// just ran dry, so it disarms the flag again.
    shrink_armed: AtomicBool,
}

impl<T> Pool<T> {
    pub fn new(capacity: usize, factory: impl Fn() -> Arc<T> + Send + Sync + 'static) -> Self {
        Self {
            capacity,
            factory: Box::new(factory),
            free: Mutex::new(Vec::with_capacity(capacity.min(64))),
            shrink_armed: AtomicBool::new(false),
        }
    }

    /// Pops a recycled object, else builds a new one via the factory.
    pub fn create(&self) -> Arc<T> {
        let popped = self.free.lock().pop();
        match popped {
            Some(obj) => obj,
            None => {
                self.shrink_armed.store(false, Ordering::Relaxed);
                (self.factory)()
            }
        }
    }

    /// Returns `obj` to the pool. Dropped immediately if the pool is
    /// already at `capacity`.
    pub fn release(&self, obj: Arc<T>) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(obj);
        }
    }

    /// One housekeeping tick: the first call after the pool last ran
    /// dry just arms the flag; the next evicts one idle entry, if any
    /// survived untouched in between.
    pub fn shrink(&self) {
        if self.shrink_armed.swap(true, Ordering::Relaxed) {
            self.free.lock().pop();
        }
    }

    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Arms a self-rearming timer that calls `pool.shrink()` every
/// `interval`, for as long as `pool` has a live strong reference
/// somewhere else. Matches `ObjectPoolBase::housekeeping_start`'s single
/// process-wide shrink timer, one per pool here for simplicity since
/// `TimerService` already serialises all callbacks through one thread.
pub fn start_housekeeping<T: Send + Sync + 'static>(
    pool: Arc<Pool<T>>,
    timer: Arc<TimerService>,
    interval: Duration,
) {
    fn arm<T: Send + Sync + 'static>(pool: Arc<Pool<T>>, timer: Arc<TimerService>, interval: Duration) {
        let weak_pool = Arc::downgrade(&pool);
        let timer_for_rearm = timer.clone();
        timer.set(crate::port::clock::now() + interval, move || {
            if let Some(pool) = weak_pool.upgrade() {
                pool.shrink();
                arm(pool, timer_for_rearm, interval);
            }
        });
    }
    arm(pool, timer, interval);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn create_recycles_released_objects() {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        let pool: Pool<u32> = Pool::new(4, || Arc::new(NEXT.fetch_add(1, Ordering::SeqCst)));
        let a = pool.create();
        pool.release(a.clone());
        let b = pool.create();
        assert_eq!(*a, *b);
    }

    #[test]
    fn release_past_capacity_drops_the_extra() {
        let pool: Pool<u32> = Pool::new(1, || Arc::new(0));
        pool.release(Arc::new(1));
        pool.release(Arc::new(2));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn shrink_needs_two_idle_ticks_to_evict() {
        let pool: Pool<u32> = Pool::new(4, || Arc::new(0));
        pool.release(Arc::new(1));
        pool.release(Arc::new(2));
        pool.shrink();
        assert_eq!(pool.len(), 2);
        pool.shrink();
        assert_eq!(pool.len(), 1);
    }
}
