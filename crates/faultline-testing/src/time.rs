//! Virtual clock for deterministic scheduling tests.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use faultline_core::Clock;

/// Controllable clock whose time only moves when a test advances it.
///
/// `sleep` advances virtual time by the requested duration immediately and
/// yields once, so a dispatch worker driven by this clock spins through its
/// poll cadence as fast as the scheduler allows while its timing arithmetic
/// stays exact.
#[derive(Clone)]
pub struct TestClock {
    /// Virtual nanoseconds elapsed since the clock was created.
    elapsed_ns: Arc<AtomicU64>,
    /// System time at creation, in seconds since the epoch.
    start_secs: u64,
    /// Anchor for deriving `Instant`s from virtual elapsed time.
    base_instant: Instant,
}

impl TestClock {
    /// Creates a clock anchored at the current time.
    pub fn new() -> Self {
        let since_epoch =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        Self {
            elapsed_ns: Arc::new(AtomicU64::new(0)),
            start_secs: since_epoch,
            base_instant: Instant::now(),
        }
    }

    /// Moves virtual time forward.
    pub fn advance(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_ns.fetch_add(nanos, Ordering::AcqRel);
    }

    /// Virtual time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Acquire))
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.base_instant + self.elapsed()
    }

    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.start_secs) + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}
