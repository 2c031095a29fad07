//! Port layer: every place this crate talks to the host OS (component C1).
//!
//! Everything above this module, the heap, execution domains, the
//! scheduler, the wait primitives, is written against these narrow
//! surfaces and never calls `libc` or `std::thread`/`std::time`
//! directly. That keeps the host-specific mechanics (virtual memory,
//! OS threads, timers, signals, security contexts) confined to one
//! place, matching the port/HAL boundary the rest of the corpus draws
//! between kernel logic and the bare-metal driver underneath it.

pub mod clock;
pub mod fiber;
pub mod security;
pub mod signal;
pub mod thread;
pub mod timer;
pub mod vm;
