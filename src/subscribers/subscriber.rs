//! # Event subscriber trait.
//!
//! [`Subscribe`] lets an application observe every record lifecycle event the
//! completion tracker consumes (audit trails, metrics, progress UIs).
//!
//! Delivery happens off the tracker's path: every subscriber of a run is fed
//! from its own queue by its own worker, and a panic inside `on_event` is
//! logged with the record id and swallowed.
//!
//! ```text
//! RunMonitor ──► SubscriberSet::emit ──► lane (bounded) ──► deliver ──► on_event(&Event)
//! ```
//!
//! ## Rules
//! - Order is preserved per subscriber, not across subscribers.
//! - When a lane is full the event is lost for that subscriber only; the
//!   number of missed events is logged when the run ends.
//! - Run completion never waits for a subscriber.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use pipevisor::{Event, EventKind, Subscribe};
//!
//! struct FailureAudit;
//!
//! #[async_trait]
//! impl Subscribe for FailureAudit {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind() == EventKind::Fail {
//!             // persist ev.record_id() and ev.message() somewhere
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "failure-audit" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Observer of record lifecycle events.
///
/// Implementations receive events of every kind and origin, including the
/// duplicate `CREATE` an executor emits for a record the producer already
/// announced. Blocking work belongs on `spawn_blocking`.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event of the run.
    async fn on_event(&self, event: &Event);

    /// Name used in logs. Defaults to the type name.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Events buffered for this subscriber before new ones are dropped (min 1).
    fn queue_capacity(&self) -> usize {
        1024
    }
}
