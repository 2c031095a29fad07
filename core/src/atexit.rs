//! At-exit registries (spec §4.9, component C10).
//!
//! Two independent flavours, both ported from `Source/AtExit.h`:
//! `AtExitSync` is a plain LIFO stack of closures run on process
//! teardown (module-level cleanup that doesn't need a mem-context,
//! e.g. releasing a process-wide lock). `AtExitAsync` is for teardown
//! that runs as if it were still inside the module's own memory scope:
//! each entry carries the mem-context reference that was current when
//! it was registered, and execution pushes that mem-context onto the
//! calling execution domain before invoking the entry's function,
//! popping it again afterwards, so a module's at-exit code can still
//! safely touch objects it allocated from its own heap.

use std::sync::Mutex;

use parking_lot::Mutex as PlMutex;

use crate::exec::neutral;
use crate::memctx::MemContext;
use std::sync::Arc;

type SyncFn = Box<dyn FnOnce() + Send>;
type AsyncFn = Box<dyn FnOnce() + Send>;

/// Synchronous at-exit chain: a plain vector, LIFO on teardown.
pub struct AtExitSync {
    entries: Mutex<Vec<SyncFn>>,
}

impl AtExitSync {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    pub fn atexit(&self, f: impl FnOnce() + Send + 'static) {
        self.entries.lock().unwrap().push(Box::new(f));
    }

    /// Runs every registered entry LIFO, swallowing panics from
    /// individual entries the same way the original swallows C++
    /// exceptions, one misbehaving cleanup must not stop the rest.
    pub fn execute(&self) {
        let mut entries = self.entries.lock().unwrap();
        while let Some(f) = entries.pop() {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).is_err() {
                log::warn!("synchronous at-exit entry panicked");
            }
        }
    }
}

impl Default for AtExitSync {
    fn default() -> Self {
        Self::new()
    }
}

struct AsyncEntry {
    mem_context: Arc<MemContext>,
    func: AsyncFn,
}

/// Asynchronous at-exit chain: a LIFO stack of entries, each carrying
/// the mem-context it was registered under.
pub struct AtExitAsync {
    entries: PlMutex<Vec<AsyncEntry>>,
}

impl AtExitAsync {
    pub fn new() -> Self {
        Self { entries: PlMutex::new(Vec::new()) }
    }

    /// Registers `f` to run under `mem_context` at teardown.
    pub fn atexit(&self, mem_context: Arc<MemContext>, f: impl FnOnce() + Send + 'static) {
        self.entries.lock().push(AsyncEntry { mem_context, func: Box::new(f) });
    }

    /// Runs every entry LIFO. If the calling thread has a mounted
    /// execution domain, each entry's function runs with its
    /// mem-context pushed onto that domain's mem-context stack
    /// (popped again immediately after, whether or not the entry
    /// panicked) so teardown code can still safely reach objects on
    /// its own heap. Outside an execution domain (e.g. process
    /// shutdown from `main`) the mem-context is noted only for
    /// logging; there's no ED to push it onto.
    pub fn execute(&self) {
        let mut entries = self.entries.lock();
        while let Some(entry) = entries.pop() {
            let ed = neutral::current();
            if let Some(ed) = &ed {
                ed.push_mem_context(entry.mem_context.clone());
            }
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(entry.func)).is_err() {
                log::warn!("asynchronous at-exit entry panicked");
            }
            if let Some(ed) = &ed {
                ed.pop_mem_context();
            }
        }
    }
}

impl Default for AtExitAsync {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;
    use crate::memctx::DeadlinePolicy;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn sync_chain_runs_lifo() {
        let chain = AtExitSync::new();
        let order = Arc::new(PlMutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            chain.atexit(move || order.lock().push(i));
        }
        chain.execute();
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn sync_chain_survives_a_panicking_entry() {
        let chain = AtExitSync::new();
        static RAN: AtomicU32 = AtomicU32::new(0);
        chain.atexit(|| panic!("boom"));
        chain.atexit(|| {
            RAN.fetch_add(1, Ordering::SeqCst);
        });
        chain.execute();
        assert_eq!(RAN.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn async_chain_runs_lifo_without_a_mounted_domain() {
        let heap = Arc::new(Heap::new(64, 1024, 256));
        let mc = MemContext::new_core(heap, DeadlinePolicy::default());
        let chain = AtExitAsync::new();
        let order = Arc::new(PlMutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            chain.atexit(mc.clone(), move || order.lock().push(i));
        }
        chain.execute();
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }
}
