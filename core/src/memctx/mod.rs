//! Memory context (spec §3 "Memory context (MC)").
//!
//! A memory context pairs a heap with the bookkeeping an execution
//! domain needs while running inside that heap's scope: a table of
//! runtime proxies keyed by user pointer (for "core" contexts this
//! table simply doesn't exist, they share the one process heap and
//! never proxy anything), and the deadline-policy defaults applied to
//! calls made without an explicit deadline.
//!
//! Life is controlled by reference count, same as every other
//! coarse-grained structure in this crate, here that's just `Arc`,
//! rather than a hand-rolled counter: nothing about a `MemContext`'s
//! teardown needs to run before the last strong reference drops, so
//! there is no reason to reimplement what `Arc` already gives us.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::heap::Heap;

/// Default deadlines applied when a call doesn't specify one.
#[derive(Debug, Clone, Copy)]
pub struct DeadlinePolicy {
    /// Default deadline for `async_call` when the caller doesn't supply one.
    pub async_default: Duration,
    /// Default deadline for oneway (fire-and-forget) calls.
    pub oneway_default: Duration,
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self {
            async_default: Duration::from_secs(30),
            oneway_default: Duration::from_secs(5),
        }
    }
}

/// An entry in a user mem-context's runtime-proxy table: the user
/// pointer it proxies for, plus an optional teardown run when the
/// entry is dropped from the table (e.g. releasing a DGC reference
/// held on behalf of a remote caller).
pub struct ProxyEntry {
    pub user_ptr: usize,
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl ProxyEntry {
    pub fn new(user_ptr: usize, teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            user_ptr,
            teardown: Some(Box::new(teardown)),
        }
    }

    pub fn inert(user_ptr: usize) -> Self {
        Self { user_ptr, teardown: None }
    }
}

impl Drop for ProxyEntry {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

enum Kind {
    /// Shares the process's one shared heap; carries no proxy table.
    Core,
    /// Owns a private heap plus a proxy table keyed by user pointer.
    User { proxies: Mutex<HashMap<usize, ProxyEntry>> },
}

pub struct MemContext {
    kind: Kind,
    heap: Arc<Heap>,
    deadline_policy: DeadlinePolicy,
}

impl MemContext {
    /// A core mem-context: no proxy table, shares `heap` with every
    /// other core mem-context in the process.
    pub fn new_core(heap: Arc<Heap>, deadline_policy: DeadlinePolicy) -> Arc<Self> {
        Arc::new(Self {
            kind: Kind::Core,
            heap,
            deadline_policy,
        })
    }

    /// A user mem-context: owns `heap` privately and tracks its own
    /// runtime-proxy table.
    pub fn new_user(heap: Arc<Heap>, deadline_policy: DeadlinePolicy) -> Arc<Self> {
        Arc::new(Self {
            kind: Kind::User { proxies: Mutex::new(HashMap::new()) },
            heap,
            deadline_policy,
        })
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    pub fn deadline_policy(&self) -> DeadlinePolicy {
        self.deadline_policy
    }

    pub fn is_user(&self) -> bool {
        matches!(self.kind, Kind::User { .. })
    }

    /// Registers a proxy entry. No-op (returns `false`) on a core
    /// context, which carries no proxy table.
    pub fn register_proxy(&self, entry: ProxyEntry) -> bool {
        match &self.kind {
            Kind::Core => false,
            Kind::User { proxies } => {
                proxies.lock().unwrap().insert(entry.user_ptr, entry);
                true
            }
        }
    }

    /// Removes and returns a proxy entry, running its teardown on drop.
    pub fn take_proxy(&self, user_ptr: usize) -> Option<ProxyEntry> {
        match &self.kind {
            Kind::Core => None,
            Kind::User { proxies } => proxies.lock().unwrap().remove(&user_ptr),
        }
    }

    pub fn proxy_count(&self) -> usize {
        match &self.kind {
            Kind::Core => 0,
            Kind::User { proxies } => proxies.lock().unwrap().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Arc<Heap> {
        Arc::new(Heap::new(64, 1024, 256))
    }

    #[test]
    fn core_context_rejects_proxy_registration() {
        let mc = MemContext::new_core(heap(), DeadlinePolicy::default());
        assert!(!mc.register_proxy(ProxyEntry::inert(0x1000)));
        assert_eq!(mc.proxy_count(), 0);
    }

    #[test]
    fn user_context_tracks_proxies_and_runs_teardown() {
        let mc = MemContext::new_user(heap(), DeadlinePolicy::default());
        let torn_down = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = torn_down.clone();
        assert!(mc.register_proxy(ProxyEntry::new(0x2000, move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst);
        })));
        assert_eq!(mc.proxy_count(), 1);
        let entry = mc.take_proxy(0x2000).unwrap();
        drop(entry);
        assert!(torn_down.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(mc.proxy_count(), 0);
    }
}
