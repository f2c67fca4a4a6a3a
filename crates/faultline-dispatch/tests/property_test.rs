//! Property tests for scheduling laws.
//!
//! Checks the backoff schedule's shape and the queue's FIFO and throttle
//! laws over generated inputs.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use faultline_dispatch::{backoff::BackoffPolicy, PayloadQueue, ReporterConfig};
use faultline_core::Payload;
use faultline_testing::MockTransport;
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #[test]
    fn backoff_is_monotone_and_capped(level in 1u32..64) {
        let policy = BackoffPolicy::without_jitter();

        prop_assert!(policy.delay(level) <= policy.delay(level + 1));
        prop_assert!(policy.delay(level) <= policy.max_delay);
        prop_assert!(policy.delay(level) >= policy.delay(1));
    }

    #[test]
    fn jittered_backoff_stays_bounded(level in 1u32..64, jitter in 0.0f64..=1.0) {
        let policy = BackoffPolicy { jitter_factor: jitter, ..BackoffPolicy::default() };

        prop_assert!(policy.delay(level) <= policy.max_delay);
    }

    #[test]
    fn queue_is_fifo(count in 1usize..50) {
        let queue = PayloadQueue::new(
            ReporterConfig::default(),
            Arc::new(MockTransport::accepting()),
        ).expect("default config is valid");

        let mut expected = Vec::new();
        for n in 0..count {
            let payload = Payload::new(json!({"seq": n}));
            expected.push(payload.id);
            queue.enqueue(payload);
        }

        // Sent payloads must come off in enqueue order; spreading dequeues
        // far apart keeps the throttle out of the picture.
        let mut now = Instant::now();
        let mut sent = Vec::new();
        while let Some(payload) = queue.dequeue(now) {
            sent.push(payload.id);
            now += Duration::from_secs(120);
        }

        prop_assert_eq!(sent, expected);
    }

    #[test]
    fn dequeue_spacing_matches_the_configured_rate(rate in 1u32..=600) {
        let config = ReporterConfig { max_reports_per_minute: rate, ..Default::default() };
        let queue = PayloadQueue::new(config, Arc::new(MockTransport::accepting()))
            .expect("rate is positive");

        queue.enqueue(Payload::new(json!({})));
        let now = Instant::now();
        queue.dequeue(now).expect("queue has one payload");

        let gap = queue
            .next_ready_at()
            .expect("dequeue opened a throttle window")
            .duration_since(now);
        let want = Duration::from_secs_f64(60.0 / f64::from(rate));

        let difference = if gap > want { gap - want } else { want - gap };
        prop_assert!(difference < Duration::from_millis(1));
    }
}
