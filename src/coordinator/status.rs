use std::sync::Arc;

use serde::Serialize;

use crate::tracker::RunReport;

/// Result of [`Coordinator::start`](crate::Coordinator::start).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    /// A new run was started with this id.
    Triggered(String),
    /// Another run is active; nothing was started.
    Skipped,
}

impl StartOutcome {
    /// Returns `"triggered"` or `"skipped"`.
    pub fn as_label(&self) -> &'static str {
        match self {
            StartOutcome::Triggered(_) => "triggered",
            StartOutcome::Skipped => "skipped",
        }
    }

    /// Run id of a triggered run.
    pub fn run_id(&self) -> Option<&str> {
        match self {
            StartOutcome::Triggered(id) => Some(id),
            StartOutcome::Skipped => None,
        }
    }
}

/// Result of [`Coordinator::await_completion`](crate::Coordinator::await_completion).
#[derive(Clone, Debug)]
pub enum AwaitOutcome {
    /// No run is active.
    Idle,
    /// The run ended; see [`RunReport::outcome`].
    Finished(Arc<RunReport>),
    /// The timeout elapsed before the run ended.
    Indeterminate,
}

impl AwaitOutcome {
    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            AwaitOutcome::Idle => "idle",
            AwaitOutcome::Finished(_) => "finished",
            AwaitOutcome::Indeterminate => "indeterminate",
        }
    }

    /// The report of a finished run.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            AwaitOutcome::Finished(report) => Some(report),
            _ => None,
        }
    }
}

/// Lifecycle of the coordinator's most recent run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No run was ever started.
    #[default]
    NotStarted,
    /// A run is active.
    Running,
    /// The last run ended.
    Completed,
}

/// Non-blocking snapshot returned by [`Coordinator::status`](crate::Coordinator::status).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    /// Active run, or the last one if idle.
    pub run_id: Option<String>,
    /// `true` while a run is active.
    pub running: bool,
    /// Lifecycle of that run.
    pub state: RunState,
}
