//! Property 2 — heap linearisability: for any interleaving of
//! concurrent allocate/release on one heap, no two live allocations
//! overlap.

use std::sync::{Arc, Mutex};

use nirvana_core::heap::Heap;
use nirvana_core::port::vm::MemFlags;
use proptest::prelude::*;

fn overlaps(a: (usize, usize), b: (usize, usize)) -> bool {
    a.0 < b.0 + b.1 && b.0 < a.0 + a.1
}

proptest! {
    #[test]
    fn no_two_live_allocations_overlap_under_concurrent_churn(
        sizes in prop::collection::vec(1usize..64, 4..40)
    ) {
        let heap = Arc::new(Heap::new(32, 4096, 1024));
        let live: Arc<Mutex<Vec<(usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));

        let chunks: Vec<Vec<usize>> = sizes
            .chunks(sizes.len().div_ceil(4).max(1))
            .map(|c| c.to_vec())
            .collect();

        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let heap = heap.clone();
                let live = live.clone();
                std::thread::spawn(move || {
                    let mut mine = Vec::new();
                    for size in chunk {
                        let size = size * 32; // a multiple of the allocation unit
                        let p = heap
                            .allocate(std::ptr::null_mut(), size, MemFlags::empty())
                            .unwrap();
                        let region = (p as usize, size);
                        {
                            let mut live = live.lock().unwrap();
                            for &other in live.iter() {
                                assert!(
                                    !overlaps(region, other),
                                    "new allocation {:?} overlaps a live one {:?}",
                                    region,
                                    other
                                );
                            }
                            live.push(region);
                        }
                        mine.push(region);
                    }
                    for (addr, size) in mine {
                        heap.release(addr as *mut u8, size).unwrap();
                        live.lock().unwrap().retain(|&r| r != (addr, size));
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        prop_assert!(heap.is_empty());
    }
}
