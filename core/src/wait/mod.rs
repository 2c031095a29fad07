//! Wait primitives and timers (spec §4.6 "Timers", §4.7 "Wait
//! primitives", component C9).

pub mod async_timer;
pub mod event_sync_timeout;
pub mod event_user;
pub mod once;

pub use async_timer::AsyncTimer;
pub use event_sync_timeout::EventSyncTimeout;
pub use event_user::EventUser;
pub use once::InitOnce;
