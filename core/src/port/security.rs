//! Security context port (spec §6 Port surface: "security contexts").
//!
//! The request-path layer (component C10) needs to carry a caller's
//! security context across an invocation so a synchronization domain
//! can impersonate the caller while servicing a request, then revert.
//! This host port only tracks an opaque identity token; it does not
//! implement any actual access-control policy, that belongs to a
//! layer above this crate.

use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque, comparable identity. `SecurityContext::anonymous()` is
/// the default context a worker thread runs under before it starts
/// impersonating anyone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SecurityContext(u64);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl SecurityContext {
    pub fn anonymous() -> Self {
        Self(0)
    }

    /// Creates a fresh, distinct security context.
    pub fn create() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Security contexts are plain values; "duplicate" just clones it.
    pub fn duplicate(&self) -> Self {
        *self
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == 0
    }
}

thread_local! {
    static CURRENT: std::cell::Cell<SecurityContext> = std::cell::Cell::new(SecurityContext::anonymous());
}

/// Returns the security context the calling thread is currently
/// impersonating.
pub fn current() -> SecurityContext {
    CURRENT.with(|c| c.get())
}

/// Installs `ctx` as the calling thread's impersonation context for
/// the lifetime of the returned guard; restores the previous context
/// on drop.
pub fn impersonate(ctx: SecurityContext) -> ImpersonationGuard {
    let previous = CURRENT.with(|c| c.replace(ctx));
    ImpersonationGuard { previous }
}

pub struct ImpersonationGuard {
    previous: SecurityContext,
}

impl Drop for ImpersonationGuard {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impersonate_restores_previous_context_on_drop() {
        assert!(current().is_anonymous());
        let ctx = SecurityContext::create();
        {
            let _guard = impersonate(ctx);
            assert_eq!(current(), ctx);
        }
        assert!(current().is_anonymous());
    }

    #[test]
    fn create_yields_distinct_contexts() {
        assert_ne!(SecurityContext::create(), SecurityContext::create());
    }
}
