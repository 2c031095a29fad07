//! Worker-thread port shim (spec §6, Port surface: "threads").

use std::thread::JoinHandle;

/// Spawns a worker thread with the given name. The master scheduler owns
/// one such thread per configured core (`Config::worker_threads`).
pub fn spawn_worker<F>(name: impl Into<String>, f: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    std::thread::Builder::new().name(name.into()).spawn(f)
}

/// Yields the current OS thread's remaining quantum. Used by
/// [`crate::primitives::BackOff`] once the spin threshold is exceeded.
pub fn yield_now() {
    std::thread::yield_now();
}

/// Best-effort priority boost for a worker that just picked up
/// time-critical work. Most hosts require elevated privileges to
/// actually raise thread priority; failure is silently ignored, matching
/// the "best effort" contract of the original port surface.
pub fn boost_priority() {
    #[cfg(target_os = "linux")]
    unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::pid_t;
        libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, -5);
    }
}

/// Opaque identifier for the calling OS thread.
pub fn current_thread_id() -> std::thread::ThreadId {
    std::thread::current().id()
}
