//! Nirvana core: a lock-free heap engine, cooperative execution
//! domains, and a deadline-ordered scheduler for serialised
//! synchronization regions.
//!
//! The module layout mirrors the original design's component split:
//!
//! - [`port`], the only place this crate touches the host OS directly.
//! - [`primitives`] / [`skiplist`], lock-free building blocks.
//! - [`heap`], the two-level allocator (component C4).
//! - [`memctx`], per-module memory context and deadline policy (C5).
//! - [`exec`], execution domains and the neutral context (C6).
//! - [`sync_domain`], one serialised region's deadline-ordered queue (C7).
//! - [`scheduler`], matches schedulable work to worker threads (C8).
//! - [`wait`], events, one-time initializers, and async timers (C9).
//! - [`pools`] / [`atexit`], bounded object pools and teardown chains (C10).
//! - [`context`], bundles every process-scoped singleton into one
//!   constructible, droppable value.
//!
//! Errors are recoverable `Result`s ([`error::CoreError`]) at every API
//! boundary that the original signals with a `CORBA::SystemException`;
//! violated internal invariants still panic, same as the original's
//! `assert`.

pub mod atexit;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod heap;
pub mod memctx;
pub mod pools;
pub mod port;
pub mod primitives;
pub mod scheduler;
pub mod skiplist;
pub mod sync_domain;
pub mod wait;

pub use config::Config;
pub use context::CoreContext;
pub use error::{CoreError, CoreResult};
pub use exec::{ExecutionDomain, Runnable, SyncContext};
pub use heap::Heap;
pub use memctx::{DeadlinePolicy, MemContext};
pub use scheduler::MasterScheduler;
pub use sync_domain::SyncDomain;
