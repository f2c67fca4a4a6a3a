//! Per-reporter payload queue.
//!
//! A thread-safe FIFO owned by one reporter. Producers append from arbitrary
//! threads; only the dispatch worker peeks and commits removals, so at most
//! one payload per queue is ever in flight. Each committed dequeue pushes the
//! queue's next eligible send out by `60s / max_reports_per_minute`, which
//! self-throttles the reporter independently of server-side rate limits.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, RwLock},
    time::Instant,
};

use chrono::Utc;
use faultline_core::{
    ConfigError, DropReason, EventBus, InternalEvent, Payload, PayloadDroppedEvent, QueueId,
    ReporterConfig, Transport,
};
use tracing::{debug, warn};

struct QueueInner {
    items: VecDeque<Payload>,
    /// Earliest instant the head may be dequeued; `None` means immediately.
    next_dequeue_at: Option<Instant>,
    /// Instant of the last committed dequeue, kept so a rate change can
    /// recompute the throttle window.
    last_dequeue_at: Option<Instant>,
    /// API errors drawn by the current head; reset on dequeue.
    head_failures: u32,
}

/// Thread-safe FIFO of payloads pending delivery for one reporter.
pub struct PayloadQueue {
    id: QueueId,
    pinned: bool,
    config: RwLock<ReporterConfig>,
    transport: Arc<dyn Transport>,
    events: RwLock<Option<EventBus>>,
    inner: Mutex<QueueInner>,
}

impl PayloadQueue {
    /// Creates a queue for the given reporter configuration and transport.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration fails validation.
    pub fn new(
        config: ReporterConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, transport, false)
    }

    /// Creates the default reporter's queue.
    ///
    /// A pinned queue participates in dispatch like any other but cannot be
    /// unregistered; it lives as long as the process.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the configuration fails validation.
    pub fn new_pinned(
        config: ReporterConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        Self::build(config, transport, true)
    }

    fn build(
        config: ReporterConfig,
        transport: Arc<dyn Transport>,
        pinned: bool,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            id: QueueId::new(),
            pinned,
            config: RwLock::new(config),
            transport,
            events: RwLock::new(None),
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                next_dequeue_at: None,
                last_dequeue_at: None,
                head_failures: 0,
            }),
        })
    }

    /// This queue's identifier.
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Whether this is the default reporter's queue.
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Snapshot of the reporter's current configuration.
    pub fn config(&self) -> ReporterConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The access token the queue currently reports under.
    pub fn access_token(&self) -> Option<String> {
        self.config.read().unwrap_or_else(|e| e.into_inner()).access_token.clone()
    }

    /// The transport chosen for this reporter.
    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Number of payloads waiting.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).items.len()
    }

    /// Whether the queue holds no payloads.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Earliest instant the head may be dequeued; `None` means immediately.
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).next_dequeue_at
    }

    /// Whether the per-queue throttle permits a dequeue at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.next_ready_at().is_none_or(|at| at <= now)
    }

    /// Appends a payload.
    ///
    /// Never blocks the caller beyond the queue mutex. When the configured
    /// depth cap is hit the oldest payload is shed and a `PayloadDropped`
    /// event fires.
    pub fn enqueue(&self, payload: Payload) {
        let max_depth = self.config.read().unwrap_or_else(|e| e.into_inner()).max_queue_depth;

        let displaced = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let displaced =
                if inner.items.len() >= max_depth { inner.items.pop_front() } else { None };
            inner.items.push_back(payload);
            displaced
        };

        if let Some(dropped) = displaced {
            warn!(queue_id = %self.id, payload_id = %dropped.id, "queue full, oldest payload shed");
            self.emit_dropped(dropped, DropReason::QueueOverflow);
        }
    }

    /// Returns the head without removing it.
    pub fn peek(&self) -> Option<Payload> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).items.front().cloned()
    }

    /// Removes and returns the head, advancing the per-queue throttle.
    ///
    /// On a non-empty dequeue the next eligible send moves to
    /// `now + 60s / max_reports_per_minute`, read from the current
    /// configuration.
    pub fn dequeue(&self, now: Instant) -> Option<Payload> {
        let interval = self.config.read().unwrap_or_else(|e| e.into_inner()).dequeue_interval();

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let payload = inner.items.pop_front()?;
        inner.next_dequeue_at = Some(now + interval);
        inner.last_dequeue_at = Some(now);
        inner.head_failures = 0;
        debug!(queue_id = %self.id, payload_id = %payload.id, "payload dequeued");
        Some(payload)
    }

    /// Records a non-throttle API error against the current head.
    ///
    /// When the head crosses the configured dead-letter threshold it is
    /// removed, a `PayloadDropped` event fires, and the dropped payload is
    /// returned. The throttle window is not advanced; the drop is not a
    /// committed send.
    pub(crate) fn note_head_failure(&self) -> Option<Payload> {
        let threshold = self.config.read().unwrap_or_else(|e| e.into_inner()).max_payload_failures;

        let poisoned = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.head_failures += 1;
            if inner.head_failures >= threshold {
                inner.head_failures = 0;
                inner.items.pop_front()
            } else {
                None
            }
        };

        let dropped = poisoned?;
        warn!(
            queue_id = %self.id,
            payload_id = %dropped.id,
            threshold,
            "head kept drawing API errors, dropped as poison"
        );
        self.emit_dropped(dropped.clone(), DropReason::PoisonPayload);
        Some(dropped)
    }

    /// Replaces the reporter configuration.
    ///
    /// The throttle window is recomputed from the last committed dequeue
    /// under the new rate, so raising `max_reports_per_minute` can make the
    /// queue eligible immediately.
    pub(crate) fn replace_config(&self, config: ReporterConfig, now: Instant) {
        let interval = config.dequeue_interval();
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_dequeue_at = inner
            .last_dequeue_at
            .map(|last| last + interval)
            .filter(|&candidate| candidate > now);
    }

    /// Attaches the dispatcher's event bus. Set on registration, cleared on
    /// unregistration.
    pub(crate) fn set_event_bus(&self, bus: Option<EventBus>) {
        *self.events.write().unwrap_or_else(|e| e.into_inner()) = bus;
    }

    fn emit_dropped(&self, payload: Payload, reason: DropReason) {
        let bus = self.events.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(bus) = bus {
            bus.publish(&InternalEvent::PayloadDropped(PayloadDroppedEvent {
                queue_id: self.id,
                payload,
                reason,
                occurred_at: Utc::now(),
            }));
        }
    }
}

impl std::fmt::Debug for PayloadQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadQueue")
            .field("id", &self.id)
            .field("pinned", &self.pinned)
            .field("len", &self.len())
            .finish()
    }
}
