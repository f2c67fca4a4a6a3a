//! Internal event bus for dispatch observability.
//!
//! The engine is fire-and-forget from the producer's point of view: callers
//! never see send failures. Everything that happens on the wire (responses,
//! transport failures, API errors, dropped payloads, swallowed worker faults)
//! is surfaced here as an [`InternalEvent`] fanned out to registered
//! observers.
//!
//! Delivery is synchronous on the emitting thread (usually the dispatch
//! worker), so observers must return quickly and must not block. A panicking
//! observer is caught and logged; it cannot take the worker down.

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use chrono::{DateTime, Utc};
use tracing::error;

use crate::{
    payload::{Payload, PayloadId, QueueId},
    transport::TransportError,
};

/// Events emitted by the dispatch engine.
#[derive(Debug, Clone)]
pub enum InternalEvent {
    /// The transport completed an exchange and a server response arrived,
    /// whatever its error code.
    Communication(CommunicationEvent),

    /// The transport failed before a server verdict was available.
    CommunicationError(CommunicationErrorEvent),

    /// The server answered with a non-zero error code.
    ApiError(ApiErrorEvent),

    /// A payload was discarded without being delivered.
    PayloadDropped(PayloadDroppedEvent),

    /// The dispatch worker swallowed an unexpected fault and kept running.
    WorkerFault(WorkerFaultEvent),
}

/// A server response was received for a payload send.
#[derive(Debug, Clone)]
pub struct CommunicationEvent {
    /// Queue whose head was sent.
    pub queue_id: QueueId,

    /// Payload that was sent.
    pub payload_id: PayloadId,

    /// Access token the send was accounted under, if configured.
    pub access_token: Option<String>,

    /// Server error code carried by the response.
    pub error_code: u32,

    /// When the response arrived.
    pub occurred_at: DateTime<Utc>,
}

/// A transport attempt failed; the payload remains queued.
#[derive(Debug, Clone)]
pub struct CommunicationErrorEvent {
    /// Queue whose head was being sent.
    pub queue_id: QueueId,

    /// Payload that failed to send.
    pub payload_id: PayloadId,

    /// The classified transport failure.
    pub error: TransportError,

    /// Send attempts left for this payload in the current service pass.
    pub retries_remaining: u32,

    /// When the failure was observed.
    pub occurred_at: DateTime<Utc>,
}

/// The server rejected a payload with a non-zero error code.
#[derive(Debug, Clone)]
pub struct ApiErrorEvent {
    /// Queue whose head was rejected.
    pub queue_id: QueueId,

    /// Payload that was rejected.
    pub payload_id: PayloadId,

    /// Access token the send was accounted under, if configured.
    pub access_token: Option<String>,

    /// Server error code (429 = throttled).
    pub error_code: u32,

    /// Raw response body for diagnostics.
    pub body: String,

    /// When the rejection was observed.
    pub occurred_at: DateTime<Utc>,
}

/// Why a payload was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The queue hit its depth cap and shed its oldest entry.
    QueueOverflow,

    /// The head kept drawing API errors and crossed the dead-letter
    /// threshold.
    PoisonPayload,
}

/// A payload was discarded without delivery.
#[derive(Debug, Clone)]
pub struct PayloadDroppedEvent {
    /// Queue the payload was dropped from.
    pub queue_id: QueueId,

    /// The discarded payload.
    pub payload: Payload,

    /// Why it was discarded.
    pub reason: DropReason,

    /// When the drop happened.
    pub occurred_at: DateTime<Utc>,
}

/// The worker caught a panic inside its service pass and continued.
#[derive(Debug, Clone)]
pub struct WorkerFaultEvent {
    /// Rendered panic payload.
    pub message: String,

    /// When the fault was caught.
    pub occurred_at: DateTime<Utc>,
}

/// Observer side of the event bus.
///
/// Called synchronously on the emitting thread. Implementations must not
/// block; long-running reactions belong on a channel or task of the
/// observer's own.
pub trait EventObserver: Send + Sync {
    /// Handles one event.
    fn on_event(&self, event: &InternalEvent);
}

impl<F> EventObserver for F
where
    F: Fn(&InternalEvent) + Send + Sync,
{
    fn on_event(&self, event: &InternalEvent) {
        self(event);
    }
}

/// Handle for removing an observer from the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Registry {
    observers: HashMap<u64, Arc<dyn EventObserver>>,
}

/// Single fan-out sink for [`InternalEvent`]s.
///
/// Cloning the bus clones a handle to the same registry. Subscription and
/// removal are atomic with respect to publication: an observer added during a
/// publish sees the next event, not the current one.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer and returns its removal handle.
    pub fn subscribe(&self, observer: Arc<dyn EventObserver>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        registry.observers.insert(id, observer);
        SubscriptionId(id)
    }

    /// Removes an observer. Returns `false` when the id is not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        registry.observers.remove(&id.0).is_some()
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.observers.len()
    }

    /// Delivers an event to every registered observer. Delivery order across
    /// observers is unspecified.
    ///
    /// Observers run outside the registry lock, so an observer may subscribe
    /// or unsubscribe reentrantly. A panicking observer is caught and logged.
    pub fn publish(&self, event: &InternalEvent) {
        let observers: Vec<Arc<dyn EventObserver>> = {
            let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
            registry.observers.values().cloned().collect()
        };

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer.on_event(event))).is_err() {
                error!("event observer panicked; event discarded for that observer");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("observers", &self.observer_count()).finish()
    }
}
