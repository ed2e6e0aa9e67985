//! The execution event log contract (§6.3): treated as an external
//! collaborator, but the trait boundary and a JSONL-backed default
//! implementation are carried as ambient stack since every complete run
//! needs an audit trail.

use serde_json::Value;

/// One append-only record in the execution event log.
#[derive(Debug, Clone)]
pub struct EventRecord {
    /// Unix timestamp (seconds) the event was emitted.
    pub timestamp: u64,
    /// Event type, e.g. `"query_attempt"` (see §6.3 for the non-exhaustive list).
    pub event_type: String,
    /// Goal this event pertains to, if any.
    pub goal_id: Option<String>,
    /// Structured payload.
    pub data: Value,
}

impl EventRecord {
    /// Creates a run-scoped event with no associated goal.
    #[must_use]
    pub fn run(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            timestamp: now_unix(),
            event_type: event_type.into(),
            goal_id: None,
            data,
        }
    }

    /// Creates an event scoped to a specific goal.
    #[must_use]
    pub fn goal(event_type: impl Into<String>, goal_id: impl Into<String>, data: Value) -> Self {
        Self {
            timestamp: now_unix(),
            event_type: event_type.into(),
            goal_id: Some(goal_id.into()),
            data,
        }
    }
}

fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Receives structured events for durable audit-trail logging.
pub trait EventSink: Send + Sync {
    /// Appends a record to the log.
    fn emit(&self, record: EventRecord);
}

/// A sink that discards every record. Useful for tests that don't care about
/// the audit trail.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _record: EventRecord) {}
}
