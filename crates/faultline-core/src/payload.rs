//! Payload unit and strongly-typed identifiers.
//!
//! The dispatch engine treats a payload as opaque: it is enqueued by a
//! reporter, carried through a queue, and handed verbatim to the transport.
//! Newtype IDs keep queue and payload identifiers from mixing at compile
//! time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly-typed payload queue identifier.
///
/// Each reporter owns exactly one queue; the dispatcher indexes scheduling
/// state by this ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueId(pub Uuid);

impl QueueId {
    /// Creates a new random queue ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for QueueId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for QueueId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed payload identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadId(pub Uuid);

impl PayloadId {
    /// Creates a new random payload ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PayloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PayloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for PayloadId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A single unit of report data awaiting delivery.
///
/// Immutable once enqueued. The body is opaque JSON assembled by the
/// reporter; the dispatch engine never inspects it, and the transport
/// serializes it after scrubbing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    /// Unique ID for this payload, stable across retries.
    pub id: PayloadId,

    /// Opaque report body.
    pub body: serde_json::Value,

    /// When the reporter handed this payload to its queue.
    pub enqueued_at: DateTime<Utc>,
}

impl Payload {
    /// Wraps a report body into a payload, stamping id and enqueue time.
    pub fn new(body: serde_json::Value) -> Self {
        Self { id: PayloadId::new(), body, enqueued_at: Utc::now() }
    }
}
