//! Heap engine (spec §4.3, component C4).
//!
//! Each heap owns a private, lock-free partition list plus a skip-list
//! index of every block it has handed out. Heaps never contend with
//! each other: the only shared state between two `Heap` instances is
//! whatever the OS's virtual memory subsystem serialises internally.

mod block;
mod directory;
mod partition;

pub use block::{BlockEntry, LargeBlock};
pub use partition::{pin, Partition, PartitionList};

use std::cmp::Reverse;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};
use crate::port::vm::{self, MemFlags, QueryParam};
use crate::skiplist::OrderedIndex;

/// Smallest and largest permitted allocation unit, in bytes (spec §4.3
/// "Structures": "rounded to a power of two in `[UNIT_MIN, UNIT_MAX]`").
const UNIT_MIN: usize = 16;
const UNIT_MAX: usize = 1 << 20;

fn round_allocation_unit(requested: usize) -> usize {
    requested.clamp(UNIT_MIN, UNIT_MAX).next_power_of_two()
}

pub struct Heap {
    allocation_unit: usize,
    partition_unit_count: usize,
    max_block_units: usize,
    partitions: PartitionList,
    /// Keyed by `Reverse(begin_address)` so ascending skip-list order
    /// walks the address space from high to low; `lower_bound(addr)`
    /// then returns the block with the greatest begin address `<=
    /// addr` in one probe, the block enclosing `addr`, if any.
    index: OrderedIndex<Reverse<usize>, BlockEntry>,
    live_bytes: AtomicUsize,
}

impl Heap {
    pub fn new(allocation_unit: usize, partition_unit_count: usize, max_block_units: usize) -> Self {
        Self {
            allocation_unit: round_allocation_unit(allocation_unit),
            partition_unit_count,
            max_block_units,
            partitions: PartitionList::new(),
            index: OrderedIndex::new(),
            live_bytes: AtomicUsize::new(0),
        }
    }

    pub fn allocation_unit(&self) -> usize {
        self.allocation_unit
    }

    fn units_for(&self, size: usize) -> Option<usize> {
        if size % self.allocation_unit != 0 {
            return None;
        }
        let units = size / self.allocation_unit;
        if units == 0 || units > self.max_block_units {
            return None;
        }
        Some(units)
    }

    /// Allocates `size` bytes. `hint` is a preferred address honoured
    /// only when `flags` contains `EXACTLY`.
    pub fn allocate(&self, hint: *mut u8, size: usize, flags: MemFlags) -> CoreResult<*mut u8> {
        if size == 0 {
            return Err(CoreError::InvalidFlag);
        }
        if flags.contains(MemFlags::EXACTLY) && !hint.is_null() {
            return self.allocate_exact(hint as usize, size, flags);
        }
        match self.units_for(size) {
            Some(units) => self.allocate_from_partitions(units, flags),
            None => self.allocate_large(size, flags),
        }
    }

    fn allocate_from_partitions(&self, units: usize, flags: MemFlags) -> CoreResult<*mut u8> {
        loop {
            let guard = pin();
            for partition in self.partitions.iter(&guard) {
                if let Some(result) = partition.allocate(units, flags) {
                    let ptr = result?;
                    self.record_partition_block(partition.clone(), ptr as usize, units);
                    self.live_bytes
                        .fetch_add(units * self.allocation_unit, Ordering::Relaxed);
                    return Ok(ptr);
                }
            }
            // No partition had room: grow and retry. A losing racer's
            // freshly reserved partition is simply dropped by `PartitionList`.
            self.partitions
                .push_new(self.allocation_unit, self.partition_unit_count, &guard)?;
        }
    }

    fn allocate_exact(&self, addr: usize, size: usize, flags: MemFlags) -> CoreResult<*mut u8> {
        let units = self.units_for(size).ok_or(CoreError::InvalidFlag)?;
        let guard = pin();
        for partition in self.partitions.iter(&guard) {
            if partition.contains(addr) {
                let ptr = partition.allocate_exact(addr, units, flags)?;
                self.record_partition_block(partition.clone(), addr, units);
                self.live_bytes
                    .fetch_add(units * self.allocation_unit, Ordering::Relaxed);
                return Ok(ptr);
            }
        }
        Err(CoreError::OutOfMemory)
    }

    fn record_partition_block(&self, partition: Arc<Partition>, addr: usize, units: usize) {
        let offset_units = partition.offset_of(addr);
        self.index.upsert(
            Reverse(addr),
            BlockEntry::Partition {
                partition,
                offset_units,
                units,
            },
        );
    }

    fn allocate_large(&self, size: usize, flags: MemFlags) -> CoreResult<*mut u8> {
        let page = vm::page_size();
        let rounded = size.div_ceil(page) * page;
        let ptr = vm::allocate(std::ptr::null_mut(), rounded, flags)?;
        let entry = BlockEntry::Large(Arc::new(LargeBlock::new(ptr as usize, rounded)));
        self.index.upsert(Reverse(ptr as usize), entry);
        self.live_bytes.fetch_add(rounded, Ordering::Relaxed);
        Ok(ptr)
    }

    /// Releases a region previously returned by [`Self::allocate`].
    pub fn release(&self, ptr: *mut u8, size: usize) -> CoreResult<()> {
        let addr = ptr as usize;
        let (_key, entry) = self
            .index
            .lower_bound(&Reverse(addr))
            .ok_or(CoreError::InvalidPointer)?;
        if !entry.contains(addr) {
            return Err(CoreError::InvalidPointer);
        }
        match entry {
            BlockEntry::Partition { partition, offset_units, units } => {
                let block_begin = partition.base() + offset_units * partition.allocation_unit();
                if addr != block_begin || size != units * partition.allocation_unit() {
                    return Err(CoreError::OutOfRange);
                }
                partition.release(addr, units, true)?;
                self.index.remove(&Reverse(block_begin));
                self.live_bytes.fetch_sub(size, Ordering::Relaxed);
                Ok(())
            }
            BlockEntry::Large(block) => self.release_large(block, addr, size),
        }
    }

    fn release_large(&self, block: Arc<LargeBlock>, addr: usize, size: usize) -> CoreResult<()> {
        let begin = block.addr();
        let full_size = block.size();
        let end = begin + full_size;
        let release_end = addr + size;
        if addr < begin || release_end > end {
            return Err(CoreError::OutOfRange);
        }
        if !block.try_collapse() {
            // Lost a race with a concurrent release/move of the same block.
            return Err(CoreError::OutOfRange);
        }
        self.index.remove(&Reverse(begin));

        vm::release((addr) as *mut u8, size)?;
        self.live_bytes.fetch_sub(size, Ordering::Relaxed);

        if addr > begin {
            let head_size = addr - begin;
            self.index.upsert(
                Reverse(begin),
                BlockEntry::Large(Arc::new(LargeBlock::new(begin, head_size))),
            );
            self.live_bytes.fetch_add(head_size, Ordering::Relaxed);
        }
        if release_end < end {
            let tail_size = end - release_end;
            self.index.upsert(
                Reverse(release_end),
                BlockEntry::Large(Arc::new(LargeBlock::new(release_end, tail_size))),
            );
            self.live_bytes.fetch_add(tail_size, Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn commit(&self, ptr: *mut u8, size: usize) -> CoreResult<()> {
        if !self.is_owner(ptr, size) {
            return Err(CoreError::InvalidPointer);
        }
        let (_key, entry) = self.index.lower_bound(&Reverse(ptr as usize)).unwrap();
        match entry {
            BlockEntry::Partition { partition, .. } => partition.commit(ptr as usize, size / partition.allocation_unit()),
            BlockEntry::Large(_) => vm::commit(ptr, size),
        }
    }

    pub fn decommit(&self, ptr: *mut u8, size: usize) -> CoreResult<()> {
        if !self.is_owner(ptr, size) {
            return Err(CoreError::InvalidPointer);
        }
        let (_key, entry) = self.index.lower_bound(&Reverse(ptr as usize)).unwrap();
        match entry {
            BlockEntry::Partition { partition, .. } => partition.decommit(ptr as usize, size / partition.allocation_unit()),
            BlockEntry::Large(_) => vm::decommit(ptr, size),
        }
    }

    /// `dst == src` changes protection only; otherwise copies `size`
    /// bytes, honouring `SRC_RELEASE`/`DST_ALLOCATE`/`SIMPLE_COPY`.
    pub fn copy(&self, dst: *mut u8, src: *const u8, size: usize, flags: MemFlags) -> CoreResult<*mut u8> {
        if dst as usize == src as usize {
            vm::protect(dst, size, flags.contains(MemFlags::READ_ONLY))?;
            return Ok(dst);
        }
        let actual_dst = if flags.contains(MemFlags::DST_ALLOCATE) {
            let overlaps = (dst as usize) < (src as usize) + size && (src as usize) < (dst as usize) + size;
            if overlaps || dst.is_null() {
                self.allocate(std::ptr::null_mut(), size, flags & !MemFlags::EXACTLY)?
            } else {
                dst
            }
        } else {
            dst
        };
        vm::copy_bytes(actual_dst, src, size);
        if flags.contains(MemFlags::SRC_RELEASE) {
            if flags.contains(MemFlags::SRC_DECOMMIT) {
                vm::decommit(src as *mut u8, size)?;
            } else {
                self.release(src as *mut u8, size)?;
            }
        }
        Ok(actual_dst)
    }

    /// Re-homes `[ptr, ptr+size)` from `other` into `self`. Partition
    /// blocks are copied byte-wise and freed from `other`; large
    /// blocks are transplanted wholesale into this heap's index using
    /// the same collapse protocol as `release`.
    pub fn move_from(&self, other: &Heap, ptr: *mut u8, size: usize) -> CoreResult<*mut u8> {
        if !other.is_owner(ptr, size) {
            return Err(CoreError::InvalidPointer);
        }
        let (_key, entry) = other.index.lower_bound(&Reverse(ptr as usize)).unwrap();
        match entry {
            BlockEntry::Large(block) if block.addr() == ptr as usize && block.size() == size => {
                if !block.try_collapse() {
                    return Err(CoreError::OutOfRange);
                }
                other.index.remove(&Reverse(ptr as usize));
                other.live_bytes.fetch_sub(size, Ordering::Relaxed);
                self.index
                    .upsert(Reverse(ptr as usize), BlockEntry::Large(Arc::new(LargeBlock::new(ptr as usize, size))));
                self.live_bytes.fetch_add(size, Ordering::Relaxed);
                Ok(ptr)
            }
            _ => {
                // Partition-backed, or a large block only partially
                // covered: copy byte-wise into a fresh allocation and
                // free the source range.
                let dst = self.allocate(std::ptr::null_mut(), size, MemFlags::empty())?;
                vm::copy_bytes(dst, ptr, size);
                other.release(ptr, size)?;
                Ok(dst)
            }
        }
    }

    /// Swaps protection on every committed page in the heap.
    pub fn change_protection(&self, read_only: bool) -> CoreResult<()> {
        let guard = pin();
        for partition in self.partitions.iter(&guard) {
            partition.change_protection(read_only)?;
        }
        Ok(())
    }

    pub fn is_private(&self, ptr: *const u8, size: usize) -> bool {
        vm::is_private(ptr, size)
    }

    /// Confirms `[ptr, ptr+size)` is entirely covered by one block this
    /// heap owns.
    pub fn is_owner(&self, ptr: *const u8, size: usize) -> bool {
        let addr = ptr as usize;
        match self.index.lower_bound(&Reverse(addr)) {
            Some((_, entry)) => entry.contains(addr) && addr + size <= entry.end(),
            None => false,
        }
    }

    pub fn query(&self, param: QueryParam) -> usize {
        match param {
            QueryParam::AllocationUnit | QueryParam::CommitUnit | QueryParam::OptimalCommitUnit => {
                self.allocation_unit.max(vm::page_size())
            }
            QueryParam::ProtectionUnit => vm::page_size(),
            QueryParam::SharingUnit => vm::page_size(),
            QueryParam::SharingAssociativity => 1,
            QueryParam::AllocationSpaceBegin => 0,
            QueryParam::AllocationSpaceEnd => usize::MAX,
            QueryParam::MemoryState => self.live_bytes.load(Ordering::Relaxed),
        }
    }

    /// `true` once every block this heap ever indexed has been released.
    /// Used by the concurrent-allocator stress scenario to confirm full
    /// cleanup after a churn of allocate/release pairs.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
