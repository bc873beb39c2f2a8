//! # Run completion tracking.
//!
//! - [`CompletionTracker`]: pure created/terminal bookkeeping with the
//!   quiescence state machine.
//! - [`RunMonitor`]: the per-run task feeding the tracker from the event
//!   channel and producing the [`RunReport`].

mod monitor;
mod report;
mod state;

pub use monitor::{Backlog, InputState, RunMonitor};
pub use report::{RunCounts, RunOutcome, RunReport};
pub use state::{CompletionState, CompletionTracker};
