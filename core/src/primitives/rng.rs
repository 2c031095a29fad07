//! Xorshift pseudo-random generator (spec §4.1, `RandomGen`/`RandomGenAtomic`).
//!
//! Not cryptographically secure. Used only to pick skip-list node levels
//! with a geometric distribution and to jitter back-off spins.

use std::sync::atomic::{AtomicU64, Ordering};

/// A 64-bit xorshift generator, seeded from its own address by default.
#[derive(Debug)]
pub struct RandomGen {
    state: u64,
}

impl RandomGen {
    pub fn new(seed: u64) -> Self {
        // xorshift requires a non-zero seed.
        Self { state: seed | 1 }
    }

    pub fn from_entropy() -> Self {
        let addr = &0u8 as *const u8 as u64;
        Self::new(addr ^ 0x9E3779B97F4A7C15)
    }

    #[inline]
    fn xorshift(mut x: u64) -> u64 {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        x
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = Self::xorshift(self.state);
        self.state
    }
}

/// Shared, lock-free xorshift generator used for skip-list level choice.
///
/// A single instance is shared by every skip list in a `CoreContext`
/// (spec: "Probabilistic level choice uses an atomic xorshift RNG shared
/// by all lists").
#[derive(Debug)]
pub struct RandomGenAtomic {
    state: AtomicU64,
}

impl RandomGenAtomic {
    pub fn new(seed: u64) -> Self {
        Self {
            state: AtomicU64::new(seed | 1),
        }
    }

    pub fn from_entropy() -> Self {
        let addr = &0u8 as *const u8 as u64;
        Self::new(addr ^ 0x9E3779B97F4A7C15)
    }

    /// Produces the next value via a lock-free read-modify-write CAS loop.
    pub fn next_u64(&self) -> u64 {
        let mut cur = self.state.load(Ordering::Relaxed);
        loop {
            let next = RandomGen::xorshift(cur);
            match self.state.compare_exchange_weak(
                cur,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Chooses a skip-list level in `[1, max_level]` with a geometric
    /// distribution: `1 + leading_zeros(random)`, capped at `max_level`.
    pub fn random_level(&self, max_level: u8) -> u8 {
        let r = self.next_u64();
        let level = 1 + r.leading_zeros() as u8;
        level.min(max_level).max(1)
    }
}

impl Default for RandomGenAtomic {
    fn default() -> Self {
        Self::from_entropy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_deterministic_for_fixed_seed() {
        let mut a = RandomGen::new(42);
        let mut b = RandomGen::new(42);
        for _ in 0..100 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn random_level_is_bounded() {
        let rng = RandomGenAtomic::new(7);
        for _ in 0..10_000 {
            let level = rng.random_level(20);
            assert!((1..=20).contains(&level));
        }
    }
}
