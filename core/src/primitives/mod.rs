//! Lock-free building blocks (spec §4.1 / component C2).

pub mod atomic_ptr;
pub mod backoff;
pub mod lockable_ptr;
pub mod refcount;
pub mod rng;

pub use atomic_ptr::{AtomicTaggedPtr, TaggedPtr};
pub use backoff::BackOff;
pub use lockable_ptr::{LockablePtr, PtrTag};
pub use refcount::RefCounter;
pub use rng::{RandomGen, RandomGenAtomic};
