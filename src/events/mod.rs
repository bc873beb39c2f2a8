//! Record lifecycle events.
//!
//! ## Contents
//! - [`EventKind`] `Create` / `Finish` / `Fail` / `Drop`
//! - [`EventStatus`] `Success` / `Failure`
//! - [`EventOrigin`] producer, executor or writer
//! - [`Event`] the immutable event value
//!
//! ## Quick reference
//! - **Publishers**: `Publisher` (producer `CREATE`), `Executor` (child `CREATE`,
//!   `FINISH`, `FAIL`, `DROP`), `WriterRunner` (`FINISH` after a batch write).
//! - **Consumers**: the run's completion tracker, which also fans events out to
//!   subscribers.

mod event;

pub use event::{Event, EventKind, EventOrigin, EventStatus};
