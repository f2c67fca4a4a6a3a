//! Event capture for dispatch tests.

use std::sync::Mutex;

use faultline_core::{EventObserver, InternalEvent};

/// Observer that stores every event it sees.
///
/// Subscribe an `Arc<EventRecorder>` on the dispatcher's bus and assert on
/// the captured sequence after driving ticks.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<InternalEvent>>,
}

impl EventRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every captured event, in arrival order.
    pub fn events(&self) -> Vec<InternalEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Total captured events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops everything captured so far.
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Captured `Communication` events.
    pub fn communications(&self) -> Vec<faultline_core::CommunicationEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                InternalEvent::Communication(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Captured `CommunicationError` events.
    pub fn communication_errors(&self) -> Vec<faultline_core::CommunicationErrorEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                InternalEvent::CommunicationError(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Captured `ApiError` events.
    pub fn api_errors(&self) -> Vec<faultline_core::ApiErrorEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                InternalEvent::ApiError(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Captured `PayloadDropped` events.
    pub fn dropped(&self) -> Vec<faultline_core::PayloadDroppedEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                InternalEvent::PayloadDropped(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    /// Captured `WorkerFault` events.
    pub fn worker_faults(&self) -> Vec<faultline_core::WorkerFaultEvent> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                InternalEvent::WorkerFault(e) => Some(e),
                _ => None,
            })
            .collect()
    }
}

impl EventObserver for EventRecorder {
    fn on_event(&self, event: &InternalEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use faultline_core::WorkerFaultEvent;

    use super::*;

    #[test]
    fn records_and_filters_by_kind() {
        let recorder = EventRecorder::new();
        recorder.on_event(&InternalEvent::WorkerFault(WorkerFaultEvent {
            message: "oops".to_string(),
            occurred_at: Utc::now(),
        }));

        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.worker_faults().len(), 1);
        assert!(recorder.communications().is_empty());

        recorder.clear();
        assert!(recorder.is_empty());
    }
}
