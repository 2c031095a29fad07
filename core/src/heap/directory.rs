//! Bitmap directory for one heap partition (spec §4.3 "Structures").
//!
//! One bit per allocation unit. A set bit means "unit is allocated".
//! A second, identically-shaped bitmap tracks commit state, since this
//! port always reserves a partition's full extent up front (`PROT_NONE`)
//! and commits units lazily via `mprotect`.
//!
//! Claiming a run is lock-free but not wait-free: a thread finds a
//! candidate run of clear bits, then CASes each word in the run in
//! order, rolling back on a losing race and retrying the scan. Runs
//! never span more than a handful of words in practice (`UNIT_COUNT`
//! words cover tens of thousands of units), so retries stay cheap.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::primitives::BackOff;

const WORD_BITS: usize = 64;

pub struct Bitmap {
    words: Vec<AtomicU64>,
    bits: usize,
}

impl Bitmap {
    pub fn new(bits: usize) -> Self {
        let word_count = bits.div_ceil(WORD_BITS);
        Self {
            words: (0..word_count).map(|_| AtomicU64::new(0)).collect(),
            bits,
        }
    }

    fn word_bit(index: usize) -> (usize, u64) {
        (index / WORD_BITS, 1u64 << (index % WORD_BITS))
    }

    pub fn is_set(&self, index: usize) -> bool {
        let (w, mask) = Self::word_bit(index);
        self.words[w].load(Ordering::Acquire) & mask != 0
    }

    /// Finds the first run of `len` consecutive clear bits at or after
    /// `from`, and `true`-CASes them to claimed, all-or-nothing.
    /// Returns the run's starting index.
    pub fn claim_run(&self, len: usize) -> Option<usize> {
        let mut backoff = BackOff::new();
        'scan: loop {
            let mut run_start = None;
            let mut run_len = 0usize;
            for i in 0..self.bits {
                if self.is_set(i) {
                    run_start = None;
                    run_len = 0;
                    continue;
                }
                if run_start.is_none() {
                    run_start = Some(i);
                }
                run_len += 1;
                if run_len == len {
                    let start = run_start.unwrap();
                    if self.try_claim_exact(start, len) {
                        return Some(start);
                    }
                    backoff.spin();
                    continue 'scan;
                }
            }
            return None;
        }
    }

    /// Claims exactly `[start, start+len)`, failing (without side
    /// effects) if any bit in the range is already set.
    pub fn try_claim_exact(&self, start: usize, len: usize) -> bool {
        if start + len > self.bits {
            return false;
        }
        let mut claimed = 0usize;
        for i in start..start + len {
            let (w, mask) = Self::word_bit(i);
            let prev = self.words[w].fetch_or(mask, Ordering::AcqRel);
            if prev & mask != 0 {
                // Already set by someone else: undo what we claimed and bail.
                for j in start..i {
                    let (w2, mask2) = Self::word_bit(j);
                    self.words[w2].fetch_and(!mask2, Ordering::AcqRel);
                }
                return false;
            }
            claimed += 1;
        }
        debug_assert_eq!(claimed, len);
        true
    }

    /// Clears `[start, start+len)`. Every bit in range must currently be set.
    pub fn release_run(&self, start: usize, len: usize) {
        for i in start..start + len {
            let (w, mask) = Self::word_bit(i);
            let prev = self.words[w].fetch_and(!mask, Ordering::AcqRel);
            debug_assert!(prev & mask != 0, "releasing an unallocated unit");
        }
    }

    pub fn all_clear(&self) -> bool {
        self.words.iter().all(|w| w.load(Ordering::Acquire) == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_then_release_round_trips() {
        let bm = Bitmap::new(256);
        let start = bm.claim_run(10).unwrap();
        assert!((0..10).all(|i| bm.is_set(start + i)));
        bm.release_run(start, 10);
        assert!(bm.all_clear());
    }

    #[test]
    fn claim_run_skips_already_claimed_units() {
        let bm = Bitmap::new(64);
        assert!(bm.try_claim_exact(0, 8));
        let start = bm.claim_run(8).unwrap();
        assert_eq!(start, 8);
    }

    #[test]
    fn claim_run_fails_when_no_space_remains() {
        let bm = Bitmap::new(8);
        assert!(bm.try_claim_exact(0, 8));
        assert!(bm.claim_run(1).is_none());
    }
}
