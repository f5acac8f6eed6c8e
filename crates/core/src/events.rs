//! Audit events attached to records.

use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::ObjectReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("Normal"),
            Self::Warning => f.write_str("Warning"),
        }
    }
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub object: ObjectReference,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit sink.
pub trait EventRecorder: Send + Sync {
    fn record(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str);
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventRecorder;

impl EventRecorder for TracingEventRecorder {
    fn record(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        match event_type {
            EventType::Normal => {
                tracing::info!(object = %object, reason = reason, "{message}");
            }
            EventType::Warning => {
                tracing::warn!(object = %object, reason = reason, "{message}");
            }
        }
    }
}

/// Keeps events in memory for inspection.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventRecorder {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl InMemoryEventRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// All events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events with the given reason.
    #[must_use]
    pub fn with_reason(&self, reason: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }
}

impl EventRecorder for InMemoryEventRecorder {
    fn record(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        let event = RecordedEvent {
            object: object.clone(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(_) => tracing::error!(object = %object, reason = reason, "event log poisoned"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{ResourceKind, Uid};

    fn reference() -> ObjectReference {
        ObjectReference {
            kind: ResourceKind::Snapshot,
            namespace: Some("default".into()),
            name: "snap".into(),
            uid: Uid::new("u1"),
        }
    }

    #[test]
    fn test_in_memory_recorder_keeps_order() {
        let recorder = InMemoryEventRecorder::new();
        recorder.record(&reference(), EventType::Normal, "First", "one");
        recorder.record(&reference(), EventType::Warning, "Second", "two");

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events.first().map(|e| e.reason.as_str()), Some("First"));
        assert_eq!(recorder.with_reason("Second").len(), 1);
    }

    #[test]
    fn test_clones_share_log() {
        let recorder = InMemoryEventRecorder::new();
        let clone = recorder.clone();
        clone.record(&reference(), EventType::Warning, "Shared", "msg");
        assert_eq!(recorder.count(), 1);
    }

    #[test]
    fn test_tracing_recorder_does_not_panic() {
        TracingEventRecorder.record(&reference(), EventType::Warning, "Reason", "message");
    }
}
