//! Execution domains and the neutral context (spec §4.4, component C6).

pub mod domain;
pub mod neutral;
pub mod runnable;

pub use domain::{ExecutionDomain, SyncContext};
pub use runnable::Runnable;
