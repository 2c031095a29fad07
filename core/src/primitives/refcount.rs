//! A minimal atomic reference counter (spec §4.1, `AtomicCounter`).
//!
//! `Arc<T>` already covers most of the crate's reference-counting needs;
//! this type exists for the handful of places (skip-list nodes, pool
//! elements) that need a *detachable* counter living inside a larger
//! `repr(C)`-ish struct rather than owning the allocation itself.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct RefCounter(AtomicUsize);

impl RefCounter {
    pub const fn new() -> Self {
        Self(AtomicUsize::new(1))
    }

    pub fn increment(&self) -> usize {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the counter and returns the new value. Callers must
    /// finalise the owning object when this returns `0`.
    pub fn decrement(&self) -> usize {
        self.0.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }
}
