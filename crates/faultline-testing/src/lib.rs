//! Deterministic test infrastructure for Faultline.
//!
//! Provides a virtual clock, a scripted mock transport, and an event
//! recorder so dispatch behavior (throttle windows, backoff schedules,
//! retry budgets) can be tested without real time or a real wire.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod events;
pub mod time;
pub mod transport;

pub use events::EventRecorder;
pub use time::TestClock;
pub use transport::{MockTransport, RecordedSend, SendOutcome};

use tracing_subscriber::EnvFilter;

/// Initializes tracing once per test process.
///
/// Honors `RUST_LOG`, defaulting to `warn` globally with `debug` for the
/// faultline crates. Safe to call from every test; repeat calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,faultline=debug")),
        )
        .with_test_writer()
        .try_init();
}
