//! Lifecycle tests for the background worker.
//!
//! Runs the real spawned worker against the virtual clock: startup drains
//! queues without explicit ticks, shutdown stops after the current pass, and
//! a panicking collaborator surfaces as a `WorkerFault` event instead of
//! killing the loop.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use faultline_dispatch::{
    backoff::BackoffPolicy, ApiResponse, Dispatcher, DispatcherConfig, PayloadQueue,
    ReporterConfig, Transport, TransportError,
};
use faultline_core::Payload;
use faultline_testing::{EventRecorder, MockTransport, TestClock};
use serde_json::json;

/// Transport with a bug: panics on every send.
#[derive(Debug)]
struct PanickingTransport;

#[async_trait]
impl Transport for PanickingTransport {
    async fn send(
        &self,
        _payload: &Payload,
        _scrub_fields: &[String],
    ) -> Result<ApiResponse, TransportError> {
        panic!("transport bug");
    }
}

fn worker_dispatcher() -> (Arc<Dispatcher>, TestClock) {
    faultline_testing::init_tracing();
    let clock = TestClock::new();
    let config =
        DispatcherConfig { backoff: BackoffPolicy::without_jitter(), ..Default::default() };
    let dispatcher = Dispatcher::with_clock(config, Arc::new(clock.clone()));
    (dispatcher, clock)
}

/// Polls until `condition` holds, failing after two seconds of wall time.
async fn wait_until(mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("condition not reached within two seconds");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

#[tokio::test]
async fn worker_drains_queues_without_explicit_ticks() -> Result<()> {
    let (dispatcher, _clock) = worker_dispatcher();
    let recorder = Arc::new(EventRecorder::new());
    dispatcher.events().subscribe(recorder.clone());

    let transport = Arc::new(MockTransport::accepting());
    let queue =
        Arc::new(PayloadQueue::new(ReporterConfig::with_token("T1"), transport)?);
    dispatcher.register(queue.clone()).await?;
    queue.enqueue(Payload::new(json!({"message": "hello"})));

    dispatcher.start();
    wait_until(|| queue.is_empty()).await?;
    dispatcher.shutdown().await;

    assert_eq!(recorder.communications().len(), 1);
    assert!(recorder.communication_errors().is_empty());
    Ok(())
}

#[tokio::test]
async fn shutdown_stops_servicing() -> Result<()> {
    let (dispatcher, _clock) = worker_dispatcher();

    let transport = Arc::new(MockTransport::accepting());
    let queue = Arc::new(PayloadQueue::new(
        ReporterConfig::with_token("T1"),
        transport.clone(),
    )?);
    dispatcher.register(queue.clone()).await?;

    dispatcher.start();
    dispatcher.shutdown().await;

    queue.enqueue(Payload::new(json!({"late": true})));
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(queue.len(), 1, "no passes run after shutdown");
    assert_eq!(transport.attempts(), 0);
    Ok(())
}

#[tokio::test]
async fn start_is_idempotent() -> Result<()> {
    let (dispatcher, _clock) = worker_dispatcher();
    dispatcher.start();
    dispatcher.start();
    dispatcher.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn panicking_transport_surfaces_as_worker_fault() -> Result<()> {
    let (dispatcher, _clock) = worker_dispatcher();
    let recorder = Arc::new(EventRecorder::new());
    dispatcher.events().subscribe(recorder.clone());

    // The healthy token sorts first so each pass services it before the
    // broken bucket aborts the pass.
    let healthy_transport = Arc::new(MockTransport::accepting());
    let healthy_queue = Arc::new(PayloadQueue::new(
        ReporterConfig::with_token("a-healthy"),
        healthy_transport,
    )?);
    let broken_queue = Arc::new(PayloadQueue::new(
        ReporterConfig::with_token("b-broken"),
        Arc::new(PanickingTransport),
    )?);
    dispatcher.register(broken_queue.clone()).await?;
    dispatcher.register(healthy_queue.clone()).await?;

    broken_queue.enqueue(Payload::new(json!({"boom": true})));
    healthy_queue.enqueue(Payload::new(json!({"fine": true})));

    dispatcher.start();
    wait_until(|| !recorder.worker_faults().is_empty()).await?;
    // The worker must survive the fault and keep servicing other queues on
    // later passes.
    wait_until(|| healthy_queue.is_empty()).await?;
    dispatcher.shutdown().await;

    let faults = recorder.worker_faults();
    assert!(faults[0].message.contains("transport bug"));
    assert_eq!(broken_queue.len(), 1, "the panicking head stays queued");
    Ok(())
}
