//! Clock abstraction for testable scheduling.
//!
//! All scheduling arithmetic in the dispatch engine (dequeue throttles,
//! token backoff windows, the inter-tick sleep) goes through [`Clock`] so
//! tests can drive virtual time instead of waiting out real delays.

use std::{
    future::Future,
    pin::Pin,
    time::{Duration, Instant, SystemTime},
};

/// Source of time for the dispatch engine.
///
/// Production uses [`RealClock`]; the test harness provides a controllable
/// implementation whose `sleep` advances virtual time immediately.
pub trait Clock: Send + Sync {
    /// Current instant for scheduling arithmetic.
    fn now(&self) -> Instant;

    /// Current wall-clock time for event timestamps.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the given duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// System clock backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}
