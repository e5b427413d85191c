//! Wall-clock access.
//!
//! The round machine reads time through [`Clock`] so lifecycle tests can
//! drive it with a hand-set clock instead of sleeping for real.

use chrono::Utc;

pub trait Clock: Send + Sync {
    /// Current epoch seconds.
    fn now_secs(&self) -> u64;

    /// Current epoch milliseconds.
    fn now_millis(&self) -> i64;
}

/// The system UTC clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        Utc::now().timestamp().max(0) as u64
    }

    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}
