//! Block index entries (spec §3 "Block", §4.3 "Release").
//!
//! Two block shapes share one index: a directory-backed block (part of
//! a partition) and a large block (allocated straight from the OS, size
//! not a multiple of the allocation unit or over `max_block_units`).
//! Large blocks carry a "collapsed" tag bit in their size word; a single
//! CAS on that word is the atomic erase protocol used by `release` and
//! `move_from`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::partition::Partition;

const COLLAPSED_BIT: usize = 1;

/// A large block's size, with its low bit stolen as the "collapsed"
/// flag. Large-block sizes always come from the OS page allocator, so
/// the low bit is free.
pub struct LargeBlock {
    addr: usize,
    size_tag: AtomicUsize,
}

impl LargeBlock {
    pub fn new(addr: usize, size: usize) -> Self {
        debug_assert_eq!(size & COLLAPSED_BIT, 0, "large block size must be page-aligned");
        Self {
            addr,
            size_tag: AtomicUsize::new(size),
        }
    }

    pub fn addr(&self) -> usize {
        self.addr
    }

    pub fn size(&self) -> usize {
        self.size_tag.load(Ordering::Acquire) & !COLLAPSED_BIT
    }

    pub fn is_collapsed(&self) -> bool {
        self.size_tag.load(Ordering::Acquire) & COLLAPSED_BIT != 0
    }

    /// Atomically marks this block erased. Fails if it was already
    /// collapsed by a racing release/move.
    pub fn try_collapse(&self) -> bool {
        let cur = self.size_tag.load(Ordering::Acquire);
        if cur & COLLAPSED_BIT != 0 {
            return false;
        }
        self.size_tag
            .compare_exchange(cur, cur | COLLAPSED_BIT, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Clone)]
pub enum BlockEntry {
    Partition {
        partition: Arc<Partition>,
        offset_units: usize,
        units: usize,
    },
    Large(Arc<LargeBlock>),
}

impl BlockEntry {
    pub fn begin(&self) -> usize {
        match self {
            BlockEntry::Partition { partition, offset_units, .. } => {
                partition.base() + offset_units * partition.allocation_unit()
            }
            BlockEntry::Large(b) => b.addr(),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            BlockEntry::Partition { partition, units, .. } => units * partition.allocation_unit(),
            BlockEntry::Large(b) => b.size(),
        }
    }

    pub fn end(&self) -> usize {
        self.begin() + self.size()
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.begin() && addr < self.end()
    }
}
