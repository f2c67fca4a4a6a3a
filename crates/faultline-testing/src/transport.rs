//! Scripted transport for dispatch tests.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use faultline_core::{ApiResponse, Payload, PayloadId, Transport, TransportError};

/// One scripted outcome for a send attempt.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Return this server response.
    Respond(ApiResponse),

    /// Fail the exchange with this transport error.
    Fail(TransportError),
}

/// A send attempt as the mock observed it.
#[derive(Debug, Clone)]
pub struct RecordedSend {
    /// The payload that was offered.
    pub payload_id: PayloadId,

    /// The payload body as given to the transport (pre-scrub; the mock does
    /// not scrub).
    pub body: serde_json::Value,

    /// The scrub-field list forwarded by the dispatcher.
    pub scrub_fields: Vec<String>,
}

/// Transport double that replays a script of outcomes.
///
/// Outcomes queued with [`push`](Self::push) are consumed in order; once the
/// script is exhausted every further send returns the fallback outcome.
/// Every attempt is recorded for assertion.
#[derive(Debug)]
pub struct MockTransport {
    script: Mutex<VecDeque<SendOutcome>>,
    fallback: Mutex<SendOutcome>,
    sends: Mutex<Vec<RecordedSend>>,
    attempt_count: AtomicUsize,
}

impl MockTransport {
    /// Creates a mock whose fallback is the given outcome.
    pub fn new(fallback: SendOutcome) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            sends: Mutex::new(Vec::new()),
            attempt_count: AtomicUsize::new(0),
        }
    }

    /// Mock that accepts every payload (`error_code` 0).
    pub fn accepting() -> Self {
        Self::new(SendOutcome::Respond(ApiResponse::ok()))
    }

    /// Mock that answers every payload with this server error code.
    pub fn answering(error_code: u32) -> Self {
        Self::new(SendOutcome::Respond(ApiResponse::with_code(error_code)))
    }

    /// Mock that fails every exchange with this transport error.
    pub fn failing(error: TransportError) -> Self {
        Self::new(SendOutcome::Fail(error))
    }

    /// Queues one scripted outcome ahead of the fallback.
    pub fn push(&self, outcome: SendOutcome) {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).push_back(outcome);
    }

    /// Replaces the fallback outcome used once the script is exhausted.
    pub fn set_fallback(&self, outcome: SendOutcome) {
        *self.fallback.lock().unwrap_or_else(|e| e.into_inner()) = outcome;
    }

    /// Every send attempt observed so far.
    pub fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of send attempts observed so far.
    pub fn attempts(&self) -> usize {
        self.attempt_count.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> SendOutcome {
        let scripted = self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(
        &self,
        payload: &Payload,
        scrub_fields: &[String],
    ) -> Result<ApiResponse, TransportError> {
        self.attempt_count.fetch_add(1, Ordering::SeqCst);
        self.sends.lock().unwrap_or_else(|e| e.into_inner()).push(RecordedSend {
            payload_id: payload.id,
            body: payload.body.clone(),
            scrub_fields: scrub_fields.to_vec(),
        });

        match self.next_outcome() {
            SendOutcome::Respond(response) => Ok(response),
            SendOutcome::Fail(error) => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn script_runs_before_fallback() -> anyhow::Result<()> {
        let mock = MockTransport::accepting();
        mock.push(SendOutcome::Respond(ApiResponse::with_code(429)));
        mock.push(SendOutcome::Fail(TransportError::network("reset")));

        let payload = Payload::new(json!({"n": 1}));

        assert_eq!(mock.send(&payload, &[]).await?.error_code, 429);
        assert!(mock.send(&payload, &[]).await.is_err());
        assert_eq!(mock.send(&payload, &[]).await?.error_code, 0);
        assert_eq!(mock.attempts(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn records_scrub_fields() -> anyhow::Result<()> {
        let mock = MockTransport::accepting();
        let payload = Payload::new(json!({"password": "x"}));
        let fields = vec!["password".to_string()];

        mock.send(&payload, &fields).await?;

        let sends = mock.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].scrub_fields, fields);
        Ok(())
    }
}
