//! Signal intake port (spec §6 Port surface: "signals").
//!
//! The runtime does not handle signals itself beyond registering a
//! best-effort hook for the crash path (an execution domain whose
//! fiber stack overflows, or a worker thread that receives `SIGSEGV`
//! while running one, should at least get a chance to run
//! `ExecutionDomain::crash` before the process dies). `CoreContext::new`
//! installs the default hook, which looks up the ED mounted on the
//! faulting thread via `exec::neutral::current` and dispatches to it;
//! hosts that want different behaviour can call `set_crash_hook` first
//! (only the first registration wins). This is deliberately thin: full
//! signal-safe crash handling is out of scope for the request-path
//! layer this crate implements, the process is still torn down by the
//! default disposition right after the hook runs.

use std::sync::OnceLock;

static CRASH_HOOK: OnceLock<Box<dyn Fn(i32) + Send + Sync>> = OnceLock::new();

/// Registers a callback invoked (best-effort, from a signal handler
/// context) when the process receives a fatal signal. May only be
/// called once; later calls are ignored.
pub fn set_crash_hook(hook: impl Fn(i32) + Send + Sync + 'static) {
    let _ = CRASH_HOOK.set(Box::new(hook));
    install();
}

/// Installs the default crash hook (ED lookup + dispatch) if none has
/// been registered yet. Called once from `CoreContext::new`; a host
/// that already called `set_crash_hook` keeps its own hook, since
/// `CRASH_HOOK` only accepts the first write.
pub fn install_default_hook() {
    set_crash_hook(|signal| match crate::exec::neutral::current() {
        Some(ed) => ed.crash(signal),
        None => unrecoverable_error(signal),
    });
}

/// Called when a fatal signal arrives with no execution domain mounted
/// on the faulting thread to receive it (spec §7: "a crashing core
/// routine calls the unrecoverable-error hook and the host decides
/// whether to terminate the process"). Logs; the process is torn down
/// by the handler's re-raise regardless; hosts wanting different
/// behaviour register their own hook via `set_crash_hook` first.
pub fn unrecoverable_error(signal: i32) {
    log::error!("unrecoverable error: signal {signal} with no execution domain mounted to receive on_crash");
}

fn install() {
    #[cfg(unix)]
    unsafe {
        extern "C" fn handler(sig: libc::c_int) {
            if let Some(hook) = CRASH_HOOK.get() {
                hook(sig);
            }
            // Re-raise with the default disposition so the process still
            // terminates (and, under a debugger, still dumps core).
            libc::signal(sig, libc::SIG_DFL);
            libc::raise(sig);
        }
        libc::signal(libc::SIGSEGV, handler as usize);
        libc::signal(libc::SIGBUS, handler as usize);
    }
}
