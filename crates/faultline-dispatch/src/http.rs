//! HTTPS transport for the ingestion service.
//!
//! Posts one payload per call as JSON, masks scrub-listed fields before
//! serialization, and classifies failures into the transport error taxonomy
//! the dispatcher's retry policy runs on.

use std::time::Duration;

use async_trait::async_trait;
use faultline_core::{ApiResponse, Payload, Transport, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::scrub::scrub_value;

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Ingestion endpoint the payloads are posted to.
    pub endpoint: String,

    /// Access token sent with each payload. The dispatcher also uses this
    /// token as its rate-limit grouping key; the two are configured from the
    /// same reporter settings.
    pub access_token: Option<String>,

    /// Per-request timeout.
    pub timeout: Duration,

    /// User agent string for requests.
    pub user_agent: String,

    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://ingest.faultline.dev/api/1/item/".to_string(),
            access_token: None,
            timeout: Duration::from_secs(30),
            user_agent: concat!("faultline/", env!("CARGO_PKG_VERSION")).to_string(),
            verify_tls: true,
        }
    }
}

/// One-payload-per-POST HTTPS transport backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl HttpTransport {
    /// Creates a transport with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidArgument` when the HTTP client cannot
    /// be built from the settings.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                TransportError::invalid_argument(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a transport posting to the default endpoint with this token.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidArgument` when the HTTP client cannot
    /// be built.
    pub fn with_token(access_token: impl Into<String>) -> Result<Self, TransportError> {
        Self::new(TransportConfig {
            access_token: Some(access_token.into()),
            ..TransportConfig::default()
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        payload: &Payload,
        scrub_fields: &[String],
    ) -> Result<ApiResponse, TransportError> {
        let data = scrub_value(&payload.body, scrub_fields);
        let envelope = json!({
            "access_token": self.config.access_token,
            "data": data,
        });

        let mut request = self.client.post(&self.config.endpoint).json(&envelope);
        if let Some(token) = &self.config.access_token {
            request = request.header("X-Access-Token", token);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        let status = response.status();

        let body = response
            .text()
            .await
            .map_err(|e| TransportError::other(format!("failed to read response body: {e}")))?;

        // A 5xx means the service itself failed; there is no server verdict
        // to hand to the response policy.
        if status.is_server_error() {
            return Err(TransportError::other(format!(
                "server error: HTTP {} from ingestion endpoint",
                status.as_u16()
            )));
        }

        let error_code = parse_error_code(&body).unwrap_or_else(|| {
            if status.is_success() {
                0
            } else {
                u32::from(status.as_u16())
            }
        });

        debug!(
            payload_id = %payload.id,
            status = status.as_u16(),
            error_code,
            "payload posted"
        );

        Ok(ApiResponse { error_code, body })
    }
}

/// Maps a reqwest send failure onto the transport error taxonomy.
fn classify_send_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        return TransportError::network(format!("request timed out: {error}"));
    }
    if error.is_connect() {
        return TransportError::network(format!("connection failed: {error}"));
    }
    if error.is_builder() || error.is_request() {
        return TransportError::invalid_argument(error.to_string());
    }
    TransportError::other(error.to_string())
}

/// Reads the server's error code from an `{"err": <code>, ...}` body.
fn parse_error_code(body: &str) -> Option<u32> {
    #[derive(Deserialize)]
    struct ErrorEnvelope {
        err: u32,
    }

    serde_json::from_str::<ErrorEnvelope>(body).ok().map(|envelope| envelope.err)
}
