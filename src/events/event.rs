//! # Record lifecycle events.
//!
//! Executors, writers and producers report what happened to each record on the
//! run's event channel. The completion tracker folds these events into the
//! run's state.
//!
//! ```text
//!            ┌──────── CREATE ─────────┐
//!            ▼                         │ (producer, or executor for children)
//!        [pending] ── FINISH ──► [done]   (terminal per Confirmation)
//!            │     ── FAIL   ──► [done]   (terminal from any origin)
//!            │     ── DROP   ──► [done]   (terminal from any origin)
//! ```
//!
//! Events are immutable values; they are serialized with the same JSON codec
//! as records.
//!
//! ## Example
//! ```rust
//! use pipevisor::{Event, EventKind, EventOrigin, EventStatus};
//!
//! let ev = Event::new(EventKind::Fail, "rec3", "run-1")
//!     .with_status(EventStatus::Failure)
//!     .with_origin(EventOrigin::Executor)
//!     .with_message("parse: bad input");
//!
//! assert!(ev.kind().is_terminal());
//! assert_eq!(ev.message(), Some("parse: bad input"));
//! ```

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Classification of record lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A record entered the run (published, or derived as a child).
    Create,
    /// A record finished processing (forwarded, or written by a writer).
    Finish,
    /// A record failed; its tombstone was routed to the destination.
    Fail,
    /// A step removed the record from the run.
    Drop,
}

impl EventKind {
    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::Create => "create",
            EventKind::Finish => "finish",
            EventKind::Fail => "fail",
            EventKind::Drop => "drop",
        }
    }

    /// Returns `true` for every kind except `Create`.
    ///
    /// Whether a `Finish` actually ends tracking also depends on its origin.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventKind::Create)
    }
}

/// Outcome carried by an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// The step, publish or write succeeded.
    #[default]
    Success,
    /// The record failed; `message` carries the reason.
    Failure,
}

/// Component that emitted an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// The run's producer (via the publisher).
    Producer,
    /// A pipeline executor.
    #[default]
    Executor,
    /// A destination writer.
    Writer,
}

impl EventOrigin {
    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventOrigin::Producer => "producer",
            EventOrigin::Executor => "executor",
            EventOrigin::Writer => "writer",
        }
    }
}

/// Lifecycle event for one record of one run.
///
/// Built with the constructors below and read through accessors; an event is
/// not changed after it is emitted.
///
/// - `record_id` / `run_id`: what the event is about
/// - `message`: free-text detail (failure reason, drop cause)
/// - `origin`: who emitted it
/// - `at`: wall-clock timestamp (for logs)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    record_id: String,
    run_id: String,
    kind: EventKind,
    #[serde(default)]
    status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default)]
    origin: EventOrigin,
    #[serde(default = "SystemTime::now")]
    at: SystemTime,
}

impl Event {
    /// Creates a successful event of the given kind, stamped now.
    pub fn new(kind: EventKind, record_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            run_id: run_id.into(),
            kind,
            status: EventStatus::Success,
            message: None,
            origin: EventOrigin::default(),
            at: SystemTime::now(),
        }
    }

    /// Sets the status.
    #[inline]
    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    /// Attaches a message.
    #[inline]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the emitting component.
    #[inline]
    pub fn with_origin(mut self, origin: EventOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// `CREATE` for a record entering the run.
    pub fn create(record_id: impl Into<String>, run_id: impl Into<String>, origin: EventOrigin) -> Self {
        Event::new(EventKind::Create, record_id, run_id).with_origin(origin)
    }

    /// `FINISH/SUCCESS` for a record that was forwarded or written.
    pub fn finished(record_id: impl Into<String>, run_id: impl Into<String>, origin: EventOrigin) -> Self {
        Event::new(EventKind::Finish, record_id, run_id).with_origin(origin)
    }

    /// `FAIL/FAILURE` with the failure reason.
    pub fn failed(
        record_id: impl Into<String>,
        run_id: impl Into<String>,
        origin: EventOrigin,
        message: impl Into<String>,
    ) -> Self {
        Event::new(EventKind::Fail, record_id, run_id)
            .with_origin(origin)
            .with_status(EventStatus::Failure)
            .with_message(message)
    }

    /// `DROP/SUCCESS` for a record a step removed.
    pub fn dropped(record_id: impl Into<String>, run_id: impl Into<String>, origin: EventOrigin) -> Self {
        Event::new(EventKind::Drop, record_id, run_id).with_origin(origin)
    }

    /// Record the event refers to.
    #[inline]
    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    /// Run the record belongs to.
    #[inline]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[inline]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    #[inline]
    pub fn status(&self) -> EventStatus {
        self.status
    }

    /// Free-text detail, if any.
    #[inline]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Emitting component.
    #[inline]
    pub fn origin(&self) -> EventOrigin {
        self.origin
    }

    /// Wall-clock time the event was created.
    #[inline]
    pub fn at(&self) -> SystemTime {
        self.at
    }

    /// Returns `true` if the status is `Failure`.
    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self.status, EventStatus::Failure)
    }

    /// Returns the message, or the kind label if none was attached.
    pub fn describe(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| self.kind.as_label().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_set_kind_status_and_origin() {
        let fail = Event::failed("r", "run", EventOrigin::Writer, "rejected");
        assert_eq!(fail.kind(), EventKind::Fail);
        assert!(fail.is_failure());
        assert_eq!(fail.origin(), EventOrigin::Writer);
        assert_eq!(fail.message(), Some("rejected"));

        let drop = Event::dropped("r", "run", EventOrigin::Executor);
        assert_eq!(drop.status(), EventStatus::Success);
        assert_eq!(drop.describe(), "drop");
    }

    #[test]
    fn test_json_round_trip() {
        let ev = Event::failed("rec3", "run-1", EventOrigin::Executor, "boom");
        let text = serde_json::to_string(&ev).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn test_decodes_minimal_payload_with_defaults() {
        let ev: Event =
            serde_json::from_str(r#"{"record_id":"a","run_id":"r","kind":"finish"}"#).unwrap();
        assert_eq!(ev.status(), EventStatus::Success);
        assert_eq!(ev.origin(), EventOrigin::Executor);
        assert!(ev.message().is_none());
        assert_eq!((ev.record_id(), ev.run_id()), ("a", "r"));
    }
}
