//! Property 5 — cross-heap move round-trip: moving a region from heap
//! A to heap B and back yields a region with the same bytes and the
//! same size, and it is owned by A again afterward.

use nirvana_core::heap::Heap;
use nirvana_core::port::vm::MemFlags;

#[test]
fn move_from_and_back_preserves_bytes() {
    let a = Heap::new(64, 1024, 256);
    let b = Heap::new(64, 1024, 256);

    let size = 512;
    let p = a.allocate(std::ptr::null_mut(), size, MemFlags::ZERO_INIT).unwrap();
    let pattern: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    unsafe { std::ptr::copy_nonoverlapping(pattern.as_ptr(), p, size) };

    let moved_to_b = b.move_from(&a, p, size).unwrap();
    assert!(b.is_owner(moved_to_b, size));
    assert!(!a.is_owner(p, size));

    let bytes_in_b = unsafe { std::slice::from_raw_parts(moved_to_b, size) };
    assert_eq!(bytes_in_b, pattern.as_slice());

    let back_in_a = a.move_from(&b, moved_to_b, size).unwrap();
    assert!(a.is_owner(back_in_a, size));
    assert!(!b.is_owner(moved_to_b, size));

    let bytes_in_a = unsafe { std::slice::from_raw_parts(back_in_a, size) };
    assert_eq!(bytes_in_a, pattern.as_slice());

    a.release(back_in_a, size).unwrap();
}

#[test]
fn move_from_a_large_block_is_a_transplant_not_a_copy() {
    // Large blocks (not partition-unit sized) round-trip by re-homing the
    // same underlying pages rather than allocating a fresh copy, so the
    // address itself is preserved across the move.
    let a = Heap::new(64, 1024, 256);
    let b = Heap::new(64, 1024, 256);

    let unit = 65536usize;
    let p = a.allocate(std::ptr::null_mut(), unit, MemFlags::ZERO_INIT).unwrap();

    let moved = b.move_from(&a, p, unit).unwrap();
    assert_eq!(moved, p, "a whole large block is transplanted at the same address");
    assert!(b.is_owner(moved, unit));
    assert!(!a.is_owner(p, unit));

    b.release(moved, unit).unwrap();
}
