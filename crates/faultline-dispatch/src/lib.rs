//! Asynchronous dispatch engine for the Faultline error reporting client.
//!
//! Owns every reporter's payload queue, groups queues into per-access-token
//! buckets, and drains them from a single background worker with adaptive
//! backoff driven by server responses.
//!
//! # Dispatch Architecture
//!
//! ```text
//!   reporter threads                     dispatch worker (one task)
//!  ┌──────────────┐  enqueue   ┌───────────────────────────────────────┐
//!  │  Reporter A  │ ─────────▶ │            Dispatcher                 │
//!  └──────────────┘            │                                       │
//!  ┌──────────────┐            │  token "T1"        token "T2"         │
//!  │  Reporter B  │ ─────────▶ │  ┌─────────────┐   ┌─────────────┐    │
//!  └──────────────┘            │  │ TokenBucket │   │ TokenBucket │    │
//!  ┌──────────────┐            │  │  queue A    │   │  queue C    │    │
//!  │  Reporter C  │ ─────────▶ │  │  queue B    │   │             │    │
//!  └──────────────┘            │  └─────────────┘   └─────────────┘    │
//!                              │        │  peek / send / commit        │
//!                              └────────┼──────────────────────────────┘
//!                                       ▼
//!                               Transport (HTTPS POST)
//!                                       │
//!                              response drives dequeue,
//!                              backoff, and event fan-out
//! ```
//!
//! Scheduling rules:
//! - FIFO within a queue; no ordering across queues or tokens.
//! - A bucket whose backoff window is open is skipped entirely.
//! - A 429 response advances the bucket's backoff window and, under the
//!   default [`RateLimitScope::HaltTick`], ends the whole service pass.
//! - Transient transport failures are retried up to three times per head per
//!   pass; everything is reported on the internal event bus.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod queue;
pub mod scrub;

pub use backoff::BackoffPolicy;
pub use dispatcher::{Dispatcher, DispatcherConfig, RateLimitScope};
pub use error::{DispatchError, Result};
pub use faultline_core::{
    ApiResponse, Clock, EventBus, EventObserver, InternalEvent, Payload, QueueId, RealClock,
    ReporterConfig, Transport, TransportError,
};
pub use http::{HttpTransport, TransportConfig};
pub use queue::PayloadQueue;

/// Default pause between service passes.
pub const DEFAULT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(250);

/// Default per-head transport attempts within one service pass.
pub const DEFAULT_TRANSPORT_RETRIES: u32 = 3;
