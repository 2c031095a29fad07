//! Virtual memory port: `mmap`/`mprotect`/`munmap` shims (spec §6, Port surface).
//!
//! This is the only module in the crate that talks to the OS for address
//! space management. Everything above `heap` treats these as opaque
//! host primitives, exactly as spec.md asks of the port layer.

use crate::error::{CoreError, CoreResult};

bitflags::bitflags! {
    /// Mirrors the flags in spec §6 ("Heap API").
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MemFlags: u32 {
        /// Reserve address space without committing physical pages.
        const RESERVED      = 1 << 0;
        /// Map the region read-only.
        const READ_ONLY      = 1 << 1;
        /// The caller requires the exact address given, or failure.
        const EXACTLY        = 1 << 2;
        /// Zero-fill the returned region.
        const ZERO_INIT      = 1 << 3;
        /// Release the source region once a copy completes.
        const SRC_RELEASE     = 1 << 4;
        /// Decommit (rather than fully release) the source region.
        const SRC_DECOMMIT    = 1 << 5;
        /// Allow `copy` to allocate a fresh destination.
        const DST_ALLOCATE    = 1 << 6;
        /// Hint that a byte-wise copy (not a remap) is acceptable.
        const SIMPLE_COPY     = 1 << 7;
        /// Map the region read-write (the default; named for symmetry with READ_ONLY).
        const READ_WRITE      = 1 << 8;
    }
}

/// Query parameters for [`crate::heap::Heap::query`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryParam {
    AllocationUnit,
    CommitUnit,
    OptimalCommitUnit,
    ProtectionUnit,
    SharingUnit,
    SharingAssociativity,
    AllocationSpaceBegin,
    AllocationSpaceEnd,
    MemoryState,
}

/// Page size as reported by the host (usually 4096).
pub fn page_size() -> usize {
    static CACHED: std::sync::OnceLock<usize> = std::sync::OnceLock::new();
    *CACHED.get_or_init(|| unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize })
}

fn prot_flags(flags: MemFlags) -> libc::c_int {
    if flags.contains(MemFlags::READ_ONLY) {
        libc::PROT_READ
    } else {
        libc::PROT_READ | libc::PROT_WRITE
    }
}

/// Reserves (and optionally commits) `size` bytes of address space.
///
/// `hint` is a preferred address; if `EXACTLY` is set and the OS cannot
/// honour `hint`, the call fails with [`CoreError::OutOfMemory`].
pub fn allocate(hint: *mut u8, size: usize, flags: MemFlags) -> CoreResult<*mut u8> {
    debug_assert!(size > 0);
    let mut mmap_flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    if !hint.is_null() {
        mmap_flags |= if flags.contains(MemFlags::EXACTLY) {
            libc::MAP_FIXED
        } else {
            0
        };
    }
    let prot = if flags.contains(MemFlags::RESERVED) {
        libc::PROT_NONE
    } else {
        prot_flags(flags)
    };
    let addr = unsafe {
        libc::mmap(
            hint as *mut libc::c_void,
            size,
            prot,
            mmap_flags,
            -1,
            0,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(CoreError::from_os(unsafe { *libc::__errno_location() }));
    }
    if flags.contains(MemFlags::EXACTLY) && !hint.is_null() && addr != hint as *mut libc::c_void {
        unsafe {
            libc::munmap(addr, size);
        }
        return Err(CoreError::OutOfMemory);
    }
    // ZERO_INIT is implicit for anonymous mmap (the kernel always zero-fills),
    // kept as a no-op branch so the flag's contract stays explicit in code.
    let _ = flags.contains(MemFlags::ZERO_INIT);
    Ok(addr as *mut u8)
}

/// Releases `size` bytes previously returned by [`allocate`].
pub fn release(p: *mut u8, size: usize) -> CoreResult<()> {
    let rc = unsafe { libc::munmap(p as *mut libc::c_void, size) };
    if rc != 0 {
        return Err(CoreError::from_os(unsafe { *libc::__errno_location() }));
    }
    Ok(())
}

/// Commits physical backing for a previously reserved region.
pub fn commit(p: *mut u8, size: usize) -> CoreResult<()> {
    let rc = unsafe {
        libc::mprotect(
            p as *mut libc::c_void,
            size,
            libc::PROT_READ | libc::PROT_WRITE,
        )
    };
    if rc != 0 {
        return Err(CoreError::from_os(unsafe { *libc::__errno_location() }));
    }
    unsafe {
        std::ptr::write_bytes(p, 0, size);
    }
    Ok(())
}

/// Decommits physical backing, leaving the address space reserved.
pub fn decommit(p: *mut u8, size: usize) -> CoreResult<()> {
    // MADV_DONTNEED drops the physical pages; PROT_NONE makes the
    // region inaccessible again until re-committed.
    unsafe {
        libc::madvise(p as *mut libc::c_void, size, libc::MADV_DONTNEED);
    }
    let rc = unsafe { libc::mprotect(p as *mut libc::c_void, size, libc::PROT_NONE) };
    if rc != 0 {
        return Err(CoreError::from_os(unsafe { *libc::__errno_location() }));
    }
    Ok(())
}

/// Changes the protection of a committed region in one call.
pub fn protect(p: *mut u8, size: usize, read_only: bool) -> CoreResult<()> {
    let prot = if read_only {
        libc::PROT_READ
    } else {
        libc::PROT_READ | libc::PROT_WRITE
    };
    let rc = unsafe { libc::mprotect(p as *mut libc::c_void, size, prot) };
    if rc != 0 {
        return Err(CoreError::from_os(unsafe { *libc::__errno_location() }));
    }
    Ok(())
}

/// Byte-wise copy between two mapped regions (`SIMPLE_COPY` fallback
/// when the addresses cannot be remapped instead).
pub fn copy_bytes(dst: *mut u8, src: *const u8, size: usize) {
    unsafe {
        std::ptr::copy(src, dst, size);
    }
}

/// `true` for any mapping made by [`allocate`], every mapping in this
/// process is `MAP_PRIVATE`, so it is never a shared CoW target.
pub fn is_private(_p: *const u8, _size: usize) -> bool {
    true
}
