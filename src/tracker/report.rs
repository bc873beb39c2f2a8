use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

use serde::Serialize;

/// Per-run record counters.
///
/// `published` counts producer publishes; the others count distinct record ids.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    /// Records the producer published.
    pub published: u64,
    /// Distinct ids seen in `CREATE` (published records plus children).
    pub created: u64,
    /// Ids that reached a successful terminal event.
    pub succeeded: u64,
    /// Ids that reached a failed terminal event.
    pub failed: u64,
    /// Ids removed by a step.
    pub dropped: u64,
}

impl RunCounts {
    /// Distinct ids that reached any terminal event.
    pub fn terminal(&self) -> u64 {
        self.succeeded + self.failed + self.dropped
    }
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The tracker declared the run complete.
    Completed,
    /// The run was cancelled before completion.
    Cancelled,
}

impl RunOutcome {
    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunOutcome::Completed => "completed",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

/// Final summary of one run.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    /// Run id.
    pub run_id: String,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Record counters.
    pub counts: RunCounts,
    /// Record id → first failure message.
    pub failures: BTreeMap<String, String>,
    /// Error returned by the producer, if any.
    pub producer_error: Option<String>,
    /// When the run started.
    pub started_at: SystemTime,
    /// When the run ended.
    pub ended_at: SystemTime,
}

impl RunReport {
    /// Wall-clock run duration.
    pub fn duration(&self) -> Duration {
        self.ended_at
            .duration_since(self.started_at)
            .unwrap_or_default()
    }

    /// Returns `true` if the run completed with no failed record and no producer error.
    pub fn is_clean(&self) -> bool {
        self.outcome == RunOutcome::Completed
            && self.failures.is_empty()
            && self.producer_error.is_none()
    }
}
