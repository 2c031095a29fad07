//! `InitOnce` (spec §4.7, supplemented from `Source/InitOnce.h`).
//!
//! A one-time initializer usable from code running inside a
//! synchronization domain, where blocking the worker's OS thread (as
//! `std::sync::Once` would) is the wrong primitive: a second caller
//! racing the first may be a *different execution domain scheduled on
//! the same worker*, and parking that thread would starve every other
//! domain waiting behind it. `InitOnce` instead cooperatively suspends
//! the caller via [`EventUser`], exactly like the original's
//! lock-then-CAS-then-wait dance over a tagged control word.
//!
//! The control word's three states, same as the original:
//! - empty (`null`, tag 0): nobody has attempted initialization yet.
//! - in progress (non-null, tag 0): the pointer identifies the
//!   in-flight [`InitOnceState`]; racers wait on its event.
//! - done (`null`, tag 1): initialization already ran; `once` is a
//!   no-op wait-free load from here on.

use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CoreResult;
use crate::port::timer::TimerService;
use crate::primitives::lockable_ptr::{LockablePtr, PtrTag};

use super::event_user::EventUser;

struct InitOnceState {
    event: Arc<EventUser>,
}

/// A control word for [`once`]. The original places this in a
/// caller-owned static; here it is an owned cell the caller places
/// wherever a `static` (or a `OnceLock`-guarded lazy slot) keeps it
/// alive for the process lifetime.
pub struct InitOnce {
    control: LockablePtr<InitOnceState, 1>,
}

impl InitOnce {
    pub fn new() -> Self {
        Self {
            control: LockablePtr::new(PtrTag::null()),
        }
    }

    fn done_marker() -> PtrTag<InitOnceState, 1> {
        PtrTag::new(ptr::null(), 1)
    }

    /// Runs `init_func` exactly once across however many callers race
    /// on this `InitOnce`, blocking (cooperatively) any caller that
    /// loses the race until the winner finishes.
    pub fn once(&self, init_func: impl FnOnce(), timer: &TimerService) -> CoreResult<()> {
        if self.control.load() == Self::done_marker() {
            return Ok(());
        }

        let locked = self.control.lock();
        if !locked.is_null() {
            // SAFETY: a non-null payload was published via `Arc::into_raw`
            // below and is kept alive by the strong count that publication
            // holds; bumping it here before dropping the lock is the same
            // add-ref-then-unlock the original performs.
            unsafe { Arc::increment_strong_count(locked.ptr()) };
            let state = unsafe { Arc::from_raw(locked.ptr()) };
            self.control.unlock();
            state.event.wait(Duration::MAX, timer)?;
            return Ok(());
        }
        self.control.unlock();

        let state = Arc::new(InitOnceState {
            event: EventUser::new(true, false),
        });
        let published = Arc::into_raw(state.clone());

        if self
            .control
            .cas(PtrTag::null(), PtrTag::new(published, 0))
        {
            init_func();
            state.event.signal();
            self.control.exchange(Self::done_marker());
            // SAFETY: reclaims the strong count `Arc::into_raw` took for
            // the control word's copy; the done marker never dereferences
            // the pointer again, so nothing else can read it.
            unsafe { drop(Arc::from_raw(published)) };
            Ok(())
        } else {
            // Lost the race: drop the reference we never got to publish,
            // then wait behind whoever won.
            unsafe { drop(Arc::from_raw(published)) };
            let locked = self.control.lock();
            let winner = if !locked.is_null() {
                unsafe { Arc::increment_strong_count(locked.ptr()) };
                Some(unsafe { Arc::from_raw(locked.ptr()) })
            } else {
                None
            };
            self.control.unlock();
            if let Some(winner) = winner {
                winner.event.wait(Duration::MAX, timer)?;
            }
            Ok(())
        }
    }

    pub fn is_done(&self) -> bool {
        self.control.load() == Self::done_marker()
    }
}

impl Default for InitOnce {
    fn default() -> Self {
        Self::new()
    }
}
