//! Core types for the Faultline error reporting client.
//!
//! Defines the payload unit, reporter configuration, the transport contract
//! the dispatch engine consumes, the internal event bus observers subscribe
//! to, and the clock abstraction that makes scheduling testable. The dispatch
//! engine itself lives in `faultline-dispatch`; this crate carries only the
//! shared vocabulary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod events;
pub mod payload;
pub mod time;
pub mod transport;

pub use config::{ConfigError, ReporterConfig};
pub use events::{
    ApiErrorEvent, CommunicationErrorEvent, CommunicationEvent, DropReason, EventBus,
    EventObserver, InternalEvent, PayloadDroppedEvent, SubscriptionId, WorkerFaultEvent,
};
pub use payload::{Payload, PayloadId, QueueId};
pub use time::{Clock, RealClock};
pub use transport::{ApiResponse, Transport, TransportError};
