//! Property 3 — commit idempotence: committing an already-committed
//! range (or decommitting an already-decommitted one) is a no-op, and
//! a decommit-then-commit cycle zero-fills the range again.

use nirvana_core::heap::Heap;
use nirvana_core::port::vm::MemFlags;

#[test]
fn repeated_commit_is_idempotent() {
    let heap = Heap::new(64, 1024, 256);
    let p = heap.allocate(std::ptr::null_mut(), 256, MemFlags::ZERO_INIT).unwrap();

    unsafe { std::ptr::write_bytes(p, 0x42, 256) };
    heap.commit(p, 256).unwrap();
    heap.commit(p, 256).unwrap();

    let bytes = unsafe { std::slice::from_raw_parts(p, 256) };
    assert!(bytes.iter().all(|&b| b == 0x42), "a repeated commit must not disturb live data");

    heap.release(p, 256).unwrap();
}

#[test]
fn repeated_decommit_is_idempotent() {
    let heap = Heap::new(64, 1024, 256);
    let p = heap.allocate(std::ptr::null_mut(), 256, MemFlags::ZERO_INIT).unwrap();

    heap.decommit(p, 256).unwrap();
    heap.decommit(p, 256).unwrap();

    heap.release(p, 256).unwrap();
}

#[test]
fn decommit_then_commit_zero_fills() {
    let heap = Heap::new(64, 1024, 256);
    let p = heap.allocate(std::ptr::null_mut(), 256, MemFlags::ZERO_INIT).unwrap();

    unsafe { std::ptr::write_bytes(p, 0xFF, 256) };
    heap.decommit(p, 256).unwrap();
    heap.commit(p, 256).unwrap();

    let bytes = unsafe { std::slice::from_raw_parts(p, 256) };
    assert!(bytes.iter().all(|&b| b == 0), "recommitting a decommitted range must come back zero-filled");

    heap.release(p, 256).unwrap();
}
