//! Transport contract between the dispatch engine and the wire.
//!
//! The engine never talks HTTP itself; it hands a payload and the scrub-field
//! list to a [`Transport`] and interprets the outcome. A returned
//! [`ApiResponse`] means the server answered (possibly with an API error
//! code); a [`TransportError`] means the exchange itself failed. The retry
//! policy in the dispatcher is a state machine over these variants, so
//! transport implementations must classify failures rather than raise them
//! opaquely.

use async_trait::async_trait;
use thiserror::Error;

use crate::payload::Payload;

/// Server error code meaning the payload was accepted.
pub const ERROR_CODE_OK: u32 = 0;

/// Server error code meaning the access token is being throttled.
pub const ERROR_CODE_THROTTLED: u32 = 429;

/// Structured response from the ingestion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// Server error code: 0 = accepted, 429 = too many requests, any other
    /// non-zero value = API error.
    pub error_code: u32,

    /// Raw response body, opaque to the engine.
    pub body: String,
}

impl ApiResponse {
    /// Builds a success response with an empty body.
    pub fn ok() -> Self {
        Self { error_code: ERROR_CODE_OK, body: String::new() }
    }

    /// Builds a response with the given error code and an empty body.
    pub fn with_code(error_code: u32) -> Self {
        Self { error_code, body: String::new() }
    }

    /// Whether the server accepted the payload.
    pub fn is_ok(&self) -> bool {
        self.error_code == ERROR_CODE_OK
    }

    /// Whether the server asked the sender to back off.
    pub fn is_throttled(&self) -> bool {
        self.error_code == ERROR_CODE_THROTTLED
    }
}

/// Failure of the payload exchange itself, before any server verdict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Network-class failure: connect refused, timeout, DNS, reset.
    /// The only transient class; the dispatcher retries these within a tick.
    #[error("network failure: {message}")]
    Network {
        /// What went wrong on the wire.
        message: String,
    },

    /// The request could not be constructed from its inputs.
    #[error("invalid request: {message}")]
    InvalidArgument {
        /// Which input was rejected.
        message: String,
    },

    /// Anything else: TLS setup, response decoding, internal client faults.
    #[error("transport failure: {message}")]
    Other {
        /// Description of the fault.
        message: String,
    },
}

impl TransportError {
    /// Creates a network-class error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Creates an uncategorized transport error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other { message: message.into() }
    }

    /// Whether the same send may succeed if repeated immediately.
    ///
    /// Only network-class failures are transient; argument and other errors
    /// will fail identically on retry, so the dispatcher zeroes the retry
    /// budget for them.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. })
    }
}

/// One-payload send operation.
///
/// Implementations are stateless per call and chosen once per reporter
/// configuration. `scrub_fields` names payload fields whose values must be
/// masked before serialization.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Posts a single payload and returns the server's structured response.
    ///
    /// # Errors
    ///
    /// Returns a classified [`TransportError`] when the exchange fails before
    /// a server verdict is available.
    async fn send(
        &self,
        payload: &Payload,
        scrub_fields: &[String],
    ) -> Result<ApiResponse, TransportError>;
}
