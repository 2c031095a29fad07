//! Tunables for a core instance.
//!
//! Every process-scoped singleton described in Design Notes §9 takes a
//! [`Config`] instead of reading global statics, so tests can instantiate
//! independent cores side by side (see `CoreContext`).

/// Configuration for one [`crate::context::CoreContext`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Allocation granularity of the process/shared heaps, in bytes.
    /// Rounded up to a power of two in `[UNIT_MIN, UNIT_MAX]` by the heap.
    pub heap_allocation_unit: usize,

    /// Number of allocation units tracked by one partition's bitmap
    /// directory.
    pub partition_unit_count: usize,

    /// Largest block size, in allocation units, that is served from a
    /// partition's bitmap directory. Anything larger (or not a multiple
    /// of the allocation unit) becomes a large block.
    pub max_block_units: usize,

    /// Number of OS worker threads in the master scheduler's pool.
    /// Defaults to the host's available parallelism.
    pub worker_threads: usize,

    /// Stack size, in bytes, for one execution domain's coroutine stack.
    pub execution_domain_stack_size: usize,

    /// Multiplier (in units of round-trip latency) used by the delayed
    /// release of incoming requests that still hold unreleased DGC
    /// references. Left as an Open Question in spec §9; made a tunable
    /// here rather than hard-coded, per the implementer's note.
    pub delayed_release_latency_multiplier: u32,

    /// Capacity of the bounded object pool for execution domains.
    pub execution_domain_pool_capacity: usize,

    /// Capacity of the bounded object pool for skip-list / queue nodes.
    pub queue_node_pool_capacity: usize,

    /// Interval at which the pool housekeeping timer considers shrinking
    /// pools whose reclamation counter has gone negative.
    pub pool_shrink_interval: std::time::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heap_allocation_unit: 64,
            partition_unit_count: 1 << 16,
            max_block_units: 1024,
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            execution_domain_stack_size: 256 * 1024,
            delayed_release_latency_multiplier: 4,
            execution_domain_pool_capacity: 256,
            queue_node_pool_capacity: 1024,
            pool_shrink_interval: std::time::Duration::from_secs(10),
        }
    }
}
