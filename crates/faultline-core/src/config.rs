//! Reporter configuration consumed by the dispatch engine.
//!
//! Only the fields the engine reads are defined here. Reconfiguration is
//! pushed to the dispatcher explicitly (`Dispatcher::apply_config`), which
//! re-buckets the queue if the access token changed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SECONDS_PER_MINUTE: f64 = 60.0;

/// Validation failures for a reporter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `max_reports_per_minute` must be positive; it divides the minute into
    /// per-queue send slots.
    #[error("max_reports_per_minute must be positive")]
    ZeroReportRate,

    /// `max_queue_depth` must be positive; a zero-depth queue could never
    /// hold a payload.
    #[error("max_queue_depth must be positive")]
    ZeroQueueDepth,

    /// `max_payload_failures` must be positive; the dead-letter threshold
    /// needs at least one attempt.
    #[error("max_payload_failures must be positive")]
    ZeroPayloadFailures,
}

/// Per-reporter configuration the dispatch engine reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Credential identifying the destination project. Also the rate-limit
    /// grouping key: all queues sharing a token share one backoff schedule.
    /// `None` means unconfigured; the queue is registered but not serviced.
    pub access_token: Option<String>,

    /// Deployment environment tag, opaque to the engine.
    pub environment: String,

    /// Upper bound on sends per minute for this reporter's queue. Each
    /// dequeue pushes the queue's next eligible send out by
    /// `60s / max_reports_per_minute`.
    pub max_reports_per_minute: u32,

    /// Field names whose values the transport masks before serialization.
    pub scrub_fields: Vec<String>,

    /// Queue depth cap. On overflow the oldest payload is dropped and a
    /// `PayloadDropped` event fires.
    pub max_queue_depth: usize,

    /// Number of non-throttle API errors a queue head may accumulate before
    /// it is dropped as poison.
    pub max_payload_failures: u32,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            environment: "production".to_string(),
            max_reports_per_minute: 60,
            scrub_fields: vec!["password".to_string(), "secret".to_string()],
            max_queue_depth: 500,
            max_payload_failures: 5,
        }
    }
}

impl ReporterConfig {
    /// Creates a configuration for the given access token with defaults for
    /// everything else.
    pub fn with_token(access_token: impl Into<String>) -> Self {
        Self { access_token: Some(access_token.into()), ..Self::default() }
    }

    /// Checks the numeric bounds the engine relies on.
    ///
    /// # Errors
    ///
    /// Returns the first violated bound.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_reports_per_minute == 0 {
            return Err(ConfigError::ZeroReportRate);
        }
        if self.max_queue_depth == 0 {
            return Err(ConfigError::ZeroQueueDepth);
        }
        if self.max_payload_failures == 0 {
            return Err(ConfigError::ZeroPayloadFailures);
        }
        Ok(())
    }

    /// Minimum wall-clock gap between two dequeues on this reporter's queue.
    pub fn dequeue_interval(&self) -> Duration {
        Duration::from_secs_f64(SECONDS_PER_MINUTE / f64::from(self.max_reports_per_minute.max(1)))
    }
}
