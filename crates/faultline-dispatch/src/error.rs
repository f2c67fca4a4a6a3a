//! Error types for dispatcher registration and lifecycle operations.
//!
//! These are programmer errors at the engine boundary: they are returned
//! loudly and never swallowed. Wire-level failures never surface here; they
//! are consumed by the worker and reported on the event bus.

use faultline_core::{ConfigError, QueueId};
use thiserror::Error;

/// Result type alias for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors returned from dispatcher registration and configuration calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The queue is already registered with this dispatcher.
    #[error("queue {queue_id} is already registered")]
    AlreadyRegistered {
        /// The offending queue.
        queue_id: QueueId,
    },

    /// The queue is not registered with this dispatcher.
    #[error("queue {queue_id} is not registered")]
    UnknownQueue {
        /// The queue that was looked up.
        queue_id: QueueId,
    },

    /// The queue belongs to the default reporter and must stay registered
    /// for the process lifetime.
    #[error("queue {queue_id} is pinned and cannot be unregistered")]
    PinnedQueue {
        /// The pinned queue.
        queue_id: QueueId,
    },

    /// The supplied reporter configuration failed validation.
    #[error("invalid reporter configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_convert() {
        let error: DispatchError = ConfigError::ZeroReportRate.into();
        assert_eq!(error, DispatchError::InvalidConfig(ConfigError::ZeroReportRate));
    }

    #[test]
    fn display_names_the_queue() {
        let queue_id = QueueId::new();
        let error = DispatchError::PinnedQueue { queue_id };
        assert!(error.to_string().contains(&queue_id.to_string()));
    }
}
