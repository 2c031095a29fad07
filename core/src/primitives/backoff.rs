//! Exponential back-off for CAS retry loops (spec §4.1).
//!
//! Always paired with a CAS loop by the caller, liveness is provided by
//! the CAS itself, not by the back-off. The back-off only reduces bus
//! contention and power draw under heavy retry.

use crossbeam_utils::Backoff;

/// A single-use, per-retry-loop back-off counter.
///
/// Thin wrapper over [`crossbeam_utils::Backoff`]: a handful of
/// `spin_loop()` hints while contention is light, then a fall-through
/// to yielding the OS thread once a retry loop has been spinning for a
/// while.
pub struct BackOff {
    inner: Backoff,
}

impl BackOff {
    pub fn new() -> Self {
        Self { inner: Backoff::new() }
    }

    /// Performs one back-off step.
    pub fn spin(&mut self) {
        self.inner.snooze();
    }
}

impl Default for BackOff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_spins_do_not_panic() {
        let mut b = BackOff::new();
        for _ in 0..64 {
            b.spin();
        }
    }
}
