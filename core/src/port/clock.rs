//! Clock port (spec §4.4 "deadline", §6 Port surface: "clocks").
//!
//! Deadlines throughout the crate (execution domain deadlines,
//! `EventSyncTimeout` expiry, the master scheduler's timer wheel) are
//! expressed as [`Instant`], a monotonic host timestamp. Wall-clock
//! time is exposed separately and only where a caller genuinely needs
//! it (logging, diagnostics), never for ordering, since `SystemTime`
//! can jump backwards under NTP correction.

use std::time::{Duration, Instant, SystemTime};

/// Monotonic "now", suitable for deadline comparisons.
pub fn now() -> Instant {
    Instant::now()
}

/// Wall-clock "now", for diagnostics only.
pub fn system_now() -> SystemTime {
    SystemTime::now()
}

/// `deadline` expressed as a delay from `now()`. Saturates to
/// [`Duration::ZERO`] for deadlines already in the past, matching the
/// "already-expired timers fire immediately" contract used by
/// [`crate::wait::event_sync_timeout`].
pub fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_saturates_at_zero_for_past_deadlines() {
        let past = now() - Duration::from_secs(1);
        assert_eq!(remaining(past), Duration::ZERO);
    }
}
