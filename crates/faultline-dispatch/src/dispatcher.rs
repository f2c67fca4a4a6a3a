//! Process-wide dispatch controller.
//!
//! Owns every registered payload queue, groups queues into per-access-token
//! buckets, and drains them from a single background worker. The worker scans
//! all buckets every poll interval; server responses drive queue advancement,
//! token backoff, and event fan-out.
//!
//! One mutex serializes registration, reconfiguration re-bucketing, and the
//! whole per-tick scan, including the transport calls. Holding the lock
//! across a send keeps bucket membership consistent at the moment a response
//! is accounted; transport concurrency is not a goal of this engine.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, OnceLock},
    time::Instant,
};

use chrono::Utc;
use faultline_core::{
    ApiErrorEvent, ApiResponse, Clock, CommunicationErrorEvent, CommunicationEvent, EventBus,
    InternalEvent, Payload, QueueId, RealClock, ReporterConfig, WorkerFaultEvent,
};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    backoff::BackoffPolicy,
    error::{DispatchError, Result},
    queue::PayloadQueue,
    DEFAULT_POLL_INTERVAL, DEFAULT_TRANSPORT_RETRIES,
};

/// How far a throttle response reaches within one service pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitScope {
    /// A 429 ends the whole pass: queues under *other* tokens also wait for
    /// the next tick. Amplifies backpressure when the server is shedding
    /// load globally.
    #[default]
    HaltTick,

    /// A 429 stops service for its own token only; remaining buckets are
    /// still scanned this pass.
    IsolateToken,
}

/// Tuning knobs for the dispatch engine.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Pause between service passes.
    pub poll_interval: std::time::Duration,

    /// Transport attempts per queue head per pass.
    pub transport_retries: u32,

    /// Backoff schedule applied to throttled tokens.
    pub backoff: BackoffPolicy,

    /// Reach of a throttle response within a pass.
    pub rate_limit_scope: RateLimitScope,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            transport_retries: DEFAULT_TRANSPORT_RETRIES,
            backoff: BackoffPolicy::default(),
            rate_limit_scope: RateLimitScope::default(),
        }
    }
}

/// Scheduling record for one access token.
///
/// Aggregates every queue currently reporting under the token. Backoff state
/// lives here, not on queues: a throttled token throttles all of its queues
/// at once.
struct TokenBucket {
    members: Vec<QueueId>,
    next_permitted_send: Option<Instant>,
    backoff_level: u32,
}

impl TokenBucket {
    fn new() -> Self {
        Self { members: Vec::new(), next_permitted_send: None, backoff_level: 0 }
    }

    fn is_blocked(&self, now: Instant) -> bool {
        self.next_permitted_send.is_some_and(|at| at > now)
    }
}

#[derive(Default)]
struct DispatchState {
    queues: HashMap<QueueId, Arc<PayloadQueue>>,
    /// Keyed by access token. `BTreeMap` gives the stable scan order the
    /// per-tick fairness argument relies on.
    buckets: BTreeMap<String, TokenBucket>,
}

impl DispatchState {
    fn add_member(&mut self, token: String, queue_id: QueueId) {
        self.buckets.entry(token).or_insert_with(TokenBucket::new).members.push(queue_id);
    }

    /// Drops a queue from its token's bucket, collecting the bucket once its
    /// last member leaves.
    fn remove_member(&mut self, token: &str, queue_id: QueueId) {
        let Some(bucket) = self.buckets.get_mut(token) else { return };
        bucket.members.retain(|id| *id != queue_id);
        if bucket.members.is_empty() {
            self.buckets.remove(token);
        }
    }
}

/// Outcome of accounting one response, steering the rest of the pass.
enum TickFlow {
    Continue,
    SkipBucket,
    Halt,
}

/// Process-wide dispatch controller.
///
/// Construct with [`Dispatcher::new`] and call [`start`](Self::start) to
/// spawn the worker, or use the shared [`global`](Self::global) instance.
/// [`shutdown`](Self::shutdown) stops the worker after its current pass.
pub struct Dispatcher {
    config: DispatcherConfig,
    state: tokio::sync::Mutex<DispatchState>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    cancellation: CancellationToken,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

static GLOBAL: OnceLock<Arc<Dispatcher>> = OnceLock::new();

impl Dispatcher {
    /// Creates a dispatcher with the system clock. The worker is not started.
    pub fn new(config: DispatcherConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(RealClock))
    }

    /// Creates a dispatcher on an explicit clock. The worker is not started.
    pub fn with_clock(config: DispatcherConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: tokio::sync::Mutex::new(DispatchState::default()),
            events: EventBus::new(),
            clock,
            cancellation: CancellationToken::new(),
            worker: std::sync::Mutex::new(None),
        })
    }

    /// The shared process-wide dispatcher, started on first access.
    ///
    /// Must first be called from within a Tokio runtime; the worker task is
    /// spawned onto the caller's runtime. Reporters that want their own
    /// lifecycle construct and own an instance instead.
    pub fn global() -> Arc<Self> {
        GLOBAL
            .get_or_init(|| {
                let dispatcher = Self::new(DispatcherConfig::default());
                dispatcher.start();
                dispatcher
            })
            .clone()
    }

    /// Spawns the background worker. Idempotent; a second call is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock().unwrap_or_else(|e| e.into_inner());
        if worker.is_some() {
            warn!("dispatch worker already running");
            return;
        }
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis(),
            "starting dispatch worker"
        );
        let dispatcher = self.clone();
        *worker = Some(tokio::spawn(dispatcher.run()));
    }

    /// Stops the worker after its current pass and waits for it to exit.
    ///
    /// Pending payloads stay queued; queues are in-memory and best-effort,
    /// so whatever is undelivered at process exit is lost.
    pub async fn shutdown(&self) {
        self.cancellation.cancel();
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if handle.await.is_err() {
                error!("dispatch worker terminated abnormally");
            }
        }
        info!("dispatch worker stopped");
    }

    /// The internal event bus for observer registration.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Registers a queue and indexes it under its current access token.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyRegistered`] when the queue is already
    /// known.
    pub async fn register(&self, queue: Arc<PayloadQueue>) -> Result<()> {
        let mut state = self.state.lock().await;

        if state.queues.contains_key(&queue.id()) {
            return Err(DispatchError::AlreadyRegistered { queue_id: queue.id() });
        }

        queue.set_event_bus(Some(self.events.clone()));
        if let Some(token) = queue.access_token() {
            state.add_member(token, queue.id());
        }
        debug!(queue_id = %queue.id(), "queue registered");
        state.queues.insert(queue.id(), queue);
        Ok(())
    }

    /// Unregisters a queue, dropping it from its token's bucket.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownQueue`] for an unregistered id and
    /// [`DispatchError::PinnedQueue`] for the default reporter's queue, which
    /// must stay registered for the process lifetime.
    pub async fn unregister(&self, queue_id: QueueId) -> Result<()> {
        let mut state = self.state.lock().await;

        let Some(queue) = state.queues.get(&queue_id) else {
            return Err(DispatchError::UnknownQueue { queue_id });
        };
        if queue.is_pinned() {
            return Err(DispatchError::PinnedQueue { queue_id });
        }

        let token = queue.access_token();
        let queue = state.queues.remove(&queue_id);
        if let Some(queue) = queue {
            queue.set_event_bus(None);
        }
        if let Some(token) = token {
            state.remove_member(&token, queue_id);
        }
        debug!(queue_id = %queue_id, "queue unregistered");
        Ok(())
    }

    /// Applies a replaced reporter configuration to a registered queue.
    ///
    /// The reporter calls this when its configuration object is swapped.
    /// If the access token changed the queue moves to the new token's bucket;
    /// this is the only path that re-buckets a queue. Setting the same token
    /// is externally a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidConfig`] for out-of-bounds settings
    /// and [`DispatchError::UnknownQueue`] for an unregistered id.
    pub async fn apply_config(&self, queue_id: QueueId, config: ReporterConfig) -> Result<()> {
        config.validate()?;
        let mut state = self.state.lock().await;

        let Some(queue) = state.queues.get(&queue_id).cloned() else {
            return Err(DispatchError::UnknownQueue { queue_id });
        };

        let old_token = queue.access_token();
        let new_token = config.access_token.clone();
        queue.replace_config(config, self.clock.now());

        if old_token != new_token {
            if let Some(old) = old_token {
                state.remove_member(&old, queue_id);
            }
            if let Some(new) = new_token {
                state.add_member(new, queue_id);
            }
            debug!(queue_id = %queue_id, "queue re-bucketed after reconfiguration");
        }
        Ok(())
    }

    /// Number of registered queues reporting under `access_token`, or the
    /// total across all tokens when the argument is `None` or empty.
    ///
    /// Unconfigured queues (no token) are registered but bucketless and are
    /// not counted.
    pub async fn queues_count(&self, access_token: Option<&str>) -> usize {
        let state = self.state.lock().await;
        match access_token.filter(|token| !token.is_empty()) {
            Some(token) => state.buckets.get(token).map_or(0, |bucket| bucket.members.len()),
            None => state.buckets.values().map(|bucket| bucket.members.len()).sum(),
        }
    }

    /// Runs a single service pass over all buckets.
    ///
    /// Buckets are scanned in token order; a bucket inside its backoff
    /// window is skipped whole. Each due queue gets one head send (with
    /// transport retries) and its response accounted. The worker calls this
    /// every poll interval; tests and embedders driving their own cadence
    /// may call it directly.
    pub async fn tick(&self) {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let tokens: Vec<String> = state.buckets.keys().cloned().collect();
        'buckets: for token in tokens {
            let Some(bucket) = state.buckets.get(&token) else { continue };
            if bucket.is_blocked(now) {
                continue;
            }

            let members = bucket.members.clone();
            for queue_id in members {
                let Some(queue) = state.queues.get(&queue_id).cloned() else { continue };
                if !queue.is_ready(now) {
                    continue;
                }
                let Some(payload) = queue.peek() else { continue };

                let Some(response) = self.send_with_retries(&queue, &payload).await else {
                    // Transport never produced a verdict; the head stays for
                    // the next pass.
                    continue;
                };

                match self.account_response(&mut state, &token, &queue, &payload, &response) {
                    TickFlow::Continue => {},
                    TickFlow::SkipBucket => continue 'buckets,
                    TickFlow::Halt => return,
                }
            }
        }
    }

    /// Sends one payload, retrying transient transport failures.
    ///
    /// Returns the server response, or `None` when the retry budget is
    /// exhausted without a verdict. Every attempt outcome is published.
    async fn send_with_retries(
        &self,
        queue: &Arc<PayloadQueue>,
        payload: &Payload,
    ) -> Option<ApiResponse> {
        let transport = queue.transport();
        let scrub_fields = queue.config().scrub_fields;
        let mut retries = self.config.transport_retries;

        loop {
            match transport.send(payload, &scrub_fields).await {
                Ok(response) => {
                    self.events.publish(&InternalEvent::Communication(CommunicationEvent {
                        queue_id: queue.id(),
                        payload_id: payload.id,
                        access_token: queue.access_token(),
                        error_code: response.error_code,
                        occurred_at: Utc::now(),
                    }));
                    return Some(response);
                },
                Err(error) => {
                    if error.is_transient() {
                        retries = retries.saturating_sub(1);
                    } else {
                        retries = 0;
                    }
                    warn!(
                        queue_id = %queue.id(),
                        payload_id = %payload.id,
                        error = %error,
                        retries_remaining = retries,
                        "payload send failed"
                    );
                    self.events.publish(&InternalEvent::CommunicationError(
                        CommunicationErrorEvent {
                            queue_id: queue.id(),
                            payload_id: payload.id,
                            error,
                            retries_remaining: retries,
                            occurred_at: Utc::now(),
                        },
                    ));
                    if retries == 0 {
                        return None;
                    }
                },
            }
        }
    }

    /// Applies the response policy for one queue head.
    fn account_response(
        &self,
        state: &mut DispatchState,
        token: &str,
        queue: &Arc<PayloadQueue>,
        payload: &Payload,
        response: &ApiResponse,
    ) -> TickFlow {
        if response.is_ok() {
            // Commit the send and clear the token's backoff.
            queue.dequeue(self.clock.now());
            if let Some(bucket) = state.buckets.get_mut(token) {
                bucket.next_permitted_send = None;
                bucket.backoff_level = 0;
            }
            return TickFlow::Continue;
        }

        self.events.publish(&InternalEvent::ApiError(ApiErrorEvent {
            queue_id: queue.id(),
            payload_id: payload.id,
            access_token: queue.access_token(),
            error_code: response.error_code,
            body: response.body.clone(),
            occurred_at: Utc::now(),
        }));

        if response.is_throttled() {
            // Head stays queued; the whole token backs off.
            if let Some(bucket) = state.buckets.get_mut(token) {
                bucket.backoff_level += 1;
                let delay = self.config.backoff.delay(bucket.backoff_level);
                bucket.next_permitted_send = Some(self.clock.now() + delay);
                debug!(
                    token,
                    backoff_level = bucket.backoff_level,
                    delay_ms = delay.as_millis(),
                    "token throttled by server"
                );
            }
            return match self.config.rate_limit_scope {
                RateLimitScope::HaltTick => TickFlow::Halt,
                RateLimitScope::IsolateToken => TickFlow::SkipBucket,
            };
        }

        // Non-throttle API error: the head is retried on later passes until
        // it crosses the dead-letter threshold.
        queue.note_head_failure();
        TickFlow::Continue
    }

    /// Worker loop: one pass per poll interval until cancelled.
    ///
    /// A panic inside a pass is caught, surfaced as a `WorkerFault` event,
    /// and the loop continues; the worker must outlive any single bad
    /// payload, observer, or transport.
    async fn run(self: Arc<Self>) {
        info!("dispatch worker running");
        loop {
            if self.cancellation.is_cancelled() {
                break;
            }

            let pass = std::panic::AssertUnwindSafe(self.tick()).catch_unwind();
            if let Err(panic) = pass.await {
                let message = panic_message(&panic);
                error!(error = %message, "dispatch pass panicked");
                self.events.publish(&InternalEvent::WorkerFault(WorkerFaultEvent {
                    message,
                    occurred_at: Utc::now(),
                }));
            }

            tokio::select! {
                () = self.clock.sleep(self.config.poll_interval) => {},
                () = self.cancellation.cancelled() => break,
            }
        }
        info!("dispatch worker exiting");
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("config", &self.config).finish()
    }
}

/// Renders a caught panic payload for diagnostics.
fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
