//! Heap partition: a fixed-extent region carved from the OS (spec §4.3).
//!
//! Partitions are created lazily and never resized once created; a
//! heap's partition list is a lock-free singly-linked list built with
//! `crossbeam_epoch`, new partitions prepended with a single CAS. A
//! racer that loses the CAS drops its own (already-reserved) partition
//! rather than retrying the insert, the OS memory it grabbed is wasted
//! but the data structure stays correct with one atomic op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};

use crate::error::{CoreError, CoreResult};
use crate::port::vm::{self, MemFlags};

use super::directory::Bitmap;

pub struct Partition {
    base: usize,
    allocation_unit: usize,
    unit_count: usize,
    alloc_directory: Bitmap,
    commit_directory: Bitmap,
    /// `true` once `change_protection(true)` has been applied; new
    /// commits re-derive their protection from this flag.
    read_only: AtomicBool,
}

unsafe impl Send for Partition {}
unsafe impl Sync for Partition {}

impl Partition {
    fn new(allocation_unit: usize, unit_count: usize) -> CoreResult<Self> {
        let size = allocation_unit * unit_count;
        let base = vm::allocate(std::ptr::null_mut(), size, MemFlags::RESERVED)?;
        Ok(Self {
            base: base as usize,
            allocation_unit,
            unit_count,
            alloc_directory: Bitmap::new(unit_count),
            commit_directory: Bitmap::new(unit_count),
            read_only: AtomicBool::new(false),
        })
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn end(&self) -> usize {
        self.base + self.allocation_unit * self.unit_count
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.end()
    }

    pub fn ptr_at(&self, offset_units: usize) -> *mut u8 {
        (self.base + offset_units * self.allocation_unit) as *mut u8
    }

    pub fn offset_of(&self, addr: usize) -> usize {
        (addr - self.base) / self.allocation_unit
    }

    pub fn allocation_unit(&self) -> usize {
        self.allocation_unit
    }

    pub fn unit_count(&self) -> usize {
        self.unit_count
    }

    /// Claims `units` contiguous free units, returning the byte pointer
    /// to the first unit. Commits and (optionally) zero-inits unless
    /// `RESERVED` is set.
    pub fn allocate(&self, units: usize, flags: MemFlags) -> Option<CoreResult<*mut u8>> {
        let start = self.alloc_directory.claim_run(units)?;
        Some(self.finish_allocate(start, units, flags))
    }

    /// Claims exactly the units covering `addr`, failing if any are
    /// already held (the "exactly at address P" path).
    pub fn allocate_exact(&self, addr: usize, units: usize, flags: MemFlags) -> CoreResult<*mut u8> {
        let start = self.offset_of(addr);
        if !self.alloc_directory.try_claim_exact(start, units) {
            return Err(CoreError::OutOfMemory);
        }
        self.finish_allocate(start, units, flags)
    }

    fn finish_allocate(&self, start: usize, units: usize, flags: MemFlags) -> CoreResult<*mut u8> {
        let ptr = self.ptr_at(start);
        if !flags.contains(MemFlags::RESERVED) {
            if let Err(e) = vm::commit(ptr, units * self.allocation_unit) {
                self.alloc_directory.release_run(start, units);
                return Err(e);
            }
            self.commit_directory.try_claim_exact(start, units);
            if self.read_only.load(Ordering::Acquire) || flags.contains(MemFlags::READ_ONLY) {
                let _ = vm::protect(ptr, units * self.allocation_unit, true);
            }
        }
        Ok(ptr)
    }

    pub fn release(&self, addr: usize, units: usize, decommit: bool) -> CoreResult<()> {
        let start = self.offset_of(addr);
        if decommit {
            let ptr = self.ptr_at(start);
            let _ = vm::decommit(ptr, units * self.allocation_unit);
            self.commit_directory.release_run(start, units);
        }
        self.alloc_directory.release_run(start, units);
        Ok(())
    }

    pub fn commit(&self, addr: usize, units: usize) -> CoreResult<()> {
        let start = self.offset_of(addr);
        let ptr = self.ptr_at(start);
        vm::commit(ptr, units * self.allocation_unit)?;
        self.commit_directory.try_claim_exact(start, units);
        Ok(())
    }

    pub fn decommit(&self, addr: usize, units: usize) -> CoreResult<()> {
        let start = self.offset_of(addr);
        let ptr = self.ptr_at(start);
        vm::decommit(ptr, units * self.allocation_unit)?;
        self.commit_directory.release_run(start, units);
        Ok(())
    }

    /// Swaps protection on every committed unit. Uncommitted units are
    /// skipped, matching spec §4.3's `change_protection`.
    pub fn change_protection(&self, read_only: bool) -> CoreResult<()> {
        self.read_only.store(read_only, Ordering::Release);
        let mut i = 0;
        while i < self.unit_count {
            let mut run = 0;
            while i + run < self.unit_count && self.commit_directory.is_set(i + run) {
                run += 1;
            }
            if run > 0 {
                let ptr = self.ptr_at(i);
                vm::protect(ptr, run * self.allocation_unit, read_only)?;
                i += run;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

}

pub struct PartitionList {
    head: Atomic<Node>,
}

/// A list node holds an `Arc<Partition>` rather than the partition
/// inline, so callers can clone a handle out of the epoch-protected
/// list and keep using it after the guard that found it is dropped:
/// the index (`Heap::index`) stores exactly such handles.
struct Node {
    partition: Arc<Partition>,
    next: Atomic<Node>,
}

impl Default for PartitionList {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionList {
    pub fn new() -> Self {
        Self {
            head: Atomic::null(),
        }
    }

    /// Allocates and prepends a new partition. A racer that loses the
    /// CAS drops its own reservation; either way some partition with
    /// room is now in the list for the caller to find on retry.
    pub fn push_new(&self, allocation_unit: usize, unit_count: usize, guard: &Guard) -> CoreResult<()> {
        let partition = Arc::new(Partition::new(allocation_unit, unit_count)?);
        let mut node = Owned::new(Node {
            partition,
            next: Atomic::null(),
        });
        loop {
            let head = self.head.load(Ordering::Acquire, guard);
            node.next.store(head, Ordering::Relaxed);
            match self.head.compare_exchange(head, node, Ordering::AcqRel, Ordering::Acquire, guard) {
                Ok(_) => return Ok(()),
                Err(e) => node = e.new,
            }
        }
    }

    pub fn iter<'g>(&'g self, guard: &'g Guard) -> PartitionIter<'g> {
        PartitionIter {
            current: self.head.load(Ordering::Acquire, guard),
            guard,
        }
    }
}

pub struct PartitionIter<'g> {
    current: Shared<'g, Node>,
    guard: &'g Guard,
}

impl Iterator for PartitionIter<'_> {
    type Item = Arc<Partition>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = unsafe { self.current.as_ref() }?;
        self.current = node.next.load(Ordering::Acquire, self.guard);
        Some(node.partition.clone())
    }
}

/// Pins the epoch for the duration of one heap operation.
pub fn pin() -> Guard {
    epoch::pin()
}
