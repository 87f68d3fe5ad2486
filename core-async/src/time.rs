//! Time-related utilities.
//!
//! `Instant` is Tokio's instant so that tests running with a paused clock
//! (`#[tokio::test(start_paused = true)]`) observe the same elapsed time as
//! the timers they drive. Cache ages and race deadlines are measured with it.

pub use tokio::time::{
    interval, sleep, sleep_until, timeout, Instant, Interval, MissedTickBehavior, Sleep, Timeout,
};

pub use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Error returned by [`timeout`] when the deadline elapses first.
pub use tokio::time::error::Elapsed as TimeoutError;

/// Returns the current wall-clock time as milliseconds since UNIX_EPOCH.
///
/// A clock set before the epoch yields `0`.
///
/// # Examples
///
/// ```rust
/// use core_async::time::now_millis;
///
/// let timestamp = now_millis();
/// assert!(timestamp > 0);
/// ```
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns the current wall-clock time as seconds since UNIX_EPOCH.
pub fn now_secs() -> u64 {
    now_millis() / 1000
}
