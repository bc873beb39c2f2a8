//! # Completion bookkeeping for one run.
//!
//! [`CompletionTracker`] is a pure state machine fed with events and the
//! end-of-input signal; it never blocks and never fails the run.
//!
//! ```text
//!            pending > 0                 pending == 0 and no CREATE
//!  ┌────────────────────────┐            for one window
//!  │        Pending         │ ─────────────────────────────► Provisional
//!  └────────────────────────┘ ◄───────────────────────────── (new CREATE)
//!                                                                │ input done and
//!                                                                │ one more window
//!                                                                ▼
//!                                                             Complete
//! ```
//!
//! ## Rules
//! - Terminal events are counted once per id.
//! - Terminal events for unseen ids are recorded but never block completion.
//! - A `CREATE` for an id that is already terminal does not make it pending.
//! - `FAIL` and `DROP` are terminal from any origin; `FINISH` is terminal from
//!   writers, and from executors only under [`Confirmation::Executor`].

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use crate::config::Confirmation;
use crate::events::{Event, EventKind, EventOrigin};
use crate::tracker::RunCounts;

/// Where a run stands with respect to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionState {
    /// Records are still in flight, or a `CREATE` arrived within the window.
    Pending {
        /// Created ids without a terminal event.
        pending: usize,
    },
    /// Everything created is terminal and the run has been quiet for a window.
    Provisional,
    /// Provisional, input finished, and quiet for one more window.
    Complete,
}

/// Tracks created and terminal record ids of one run.
#[derive(Debug)]
pub struct CompletionTracker {
    run_id: String,
    confirmation: Confirmation,
    window: Duration,
    created: HashSet<String>,
    terminal: HashSet<String>,
    pending: HashSet<String>,
    counts: RunCounts,
    failures: BTreeMap<String, String>,
    started_at: Instant,
    last_create: Option<Instant>,
    drained_at: Option<Instant>,
    input_done_at: Option<Instant>,
}

impl CompletionTracker {
    /// Creates a tracker for `run_id` with the given quiescence window.
    pub fn new(run_id: impl Into<String>, confirmation: Confirmation, window: Duration) -> Self {
        Self {
            run_id: run_id.into(),
            confirmation,
            window,
            created: HashSet::new(),
            terminal: HashSet::new(),
            pending: HashSet::new(),
            counts: RunCounts::default(),
            failures: BTreeMap::new(),
            started_at: Instant::now(),
            last_create: None,
            drained_at: None,
            input_done_at: None,
        }
    }

    /// Run id.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Returns `true` if `event` ends its record's lifecycle.
    pub fn is_terminal(&self, event: &Event) -> bool {
        match event.kind() {
            EventKind::Create => false,
            EventKind::Fail | EventKind::Drop => true,
            EventKind::Finish => match event.origin() {
                EventOrigin::Writer => true,
                EventOrigin::Executor => self.confirmation == Confirmation::Executor,
                EventOrigin::Producer => false,
            },
        }
    }

    /// Applies one event observed now.
    pub fn observe(&mut self, event: &Event) {
        self.observe_at(event, Instant::now());
    }

    /// Applies one event observed at `now`.
    pub fn observe_at(&mut self, event: &Event, now: Instant) {
        if event.run_id() != self.run_id {
            return;
        }
        if event.is_failure() {
            self.failures
                .entry(event.record_id().to_owned())
                .or_insert_with(|| event.describe());
        }

        if event.kind() == EventKind::Create {
            if event.origin() == EventOrigin::Producer {
                self.counts.published += 1;
            }
            if self.created.insert(event.record_id().to_owned()) {
                self.counts.created += 1;
                self.last_create = Some(now);
                if !self.terminal.contains(event.record_id()) {
                    self.pending.insert(event.record_id().to_owned());
                }
            }
            return;
        }

        if !self.is_terminal(event) || !self.terminal.insert(event.record_id().to_owned()) {
            return;
        }
        match (event.kind(), event.is_failure()) {
            (EventKind::Drop, _) => self.counts.dropped += 1,
            (_, true) => self.counts.failed += 1,
            (_, false) => self.counts.succeeded += 1,
        }
        if self.pending.remove(event.record_id()) && self.pending.is_empty() {
            self.drained_at = Some(now);
        }
    }

    /// Records end-of-input now. Repeated calls keep the first time.
    pub fn input_finished(&mut self) {
        self.input_finished_at(Instant::now());
    }

    /// Records end-of-input at `now`. Repeated calls keep the first time.
    pub fn input_finished_at(&mut self, now: Instant) {
        self.input_done_at.get_or_insert(now);
    }

    /// Returns `true` once end-of-input was recorded.
    pub fn is_input_finished(&self) -> bool {
        self.input_done_at.is_some()
    }

    /// Completion state as of now.
    pub fn state(&self) -> CompletionState {
        self.state_at(Instant::now())
    }

    /// Completion state as of `now`.
    pub fn state_at(&self, now: Instant) -> CompletionState {
        if !self.pending.is_empty() {
            return CompletionState::Pending {
                pending: self.pending.len(),
            };
        }
        let drained = self.drained_at.unwrap_or(self.started_at);
        let quiet = self.last_create.unwrap_or(self.started_at) + self.window;
        let provisional_since = drained.max(quiet);
        if now < provisional_since {
            return CompletionState::Pending { pending: 0 };
        }
        match self.input_done_at {
            Some(done) if now >= provisional_since.max(done) + self.window => {
                CompletionState::Complete
            }
            _ => CompletionState::Provisional,
        }
    }

    /// Current counters.
    pub fn counts(&self) -> RunCounts {
        self.counts
    }

    /// Record id → first failure message.
    pub fn failures(&self) -> &BTreeMap<String, String> {
        &self.failures
    }

    /// Consumes the tracker, returning its failure map.
    pub fn into_failures(self) -> BTreeMap<String, String> {
        self.failures
    }

    /// Number of created ids without a terminal event.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventStatus;

    const W: Duration = Duration::from_millis(100);

    fn tracker() -> (CompletionTracker, Instant) {
        let t = CompletionTracker::new("run", Confirmation::Writer, W);
        let t0 = t.started_at;
        (t, t0)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_duplicate_terminal_events_counted_once() {
        let (mut t, t0) = tracker();
        t.observe_at(&Event::create("a", "run", EventOrigin::Producer), t0);
        let fin = Event::finished("a", "run", EventOrigin::Writer);
        t.observe_at(&fin, t0);
        t.observe_at(&fin, t0);

        assert_eq!(t.counts().succeeded, 1);
        assert_eq!(t.counts().terminal(), 1);
        assert_eq!(t.pending_len(), 0);
    }

    #[test]
    fn test_executor_finish_not_terminal_with_writer_confirmation() {
        let (mut t, t0) = tracker();
        t.observe_at(&Event::create("a", "run", EventOrigin::Producer), t0);
        t.observe_at(&Event::finished("a", "run", EventOrigin::Executor), t0);
        assert_eq!(t.state_at(t0 + ms(500)), CompletionState::Pending { pending: 1 });

        let mut exec = CompletionTracker::new("run", Confirmation::Executor, W);
        exec.observe_at(&Event::create("a", "run", EventOrigin::Producer), t0);
        exec.observe_at(&Event::finished("a", "run", EventOrigin::Executor), t0);
        assert_eq!(exec.pending_len(), 0);
    }

    #[test]
    fn test_unknown_and_late_ids_do_not_block() {
        let (mut t, t0) = tracker();
        t.observe_at(&Event::dropped("ghost", "run", EventOrigin::Executor), t0);
        t.observe_at(&Event::create("ghost", "run", EventOrigin::Executor), t0);
        assert_eq!(t.pending_len(), 0);
        assert_eq!(t.counts().created, 1);
        assert_eq!(t.counts().dropped, 1);
    }

    #[test]
    fn test_quiescence_then_input_done_completes() {
        let (mut t, t0) = tracker();
        t.observe_at(&Event::create("a", "run", EventOrigin::Producer), t0 + ms(10));
        t.observe_at(&Event::finished("a", "run", EventOrigin::Writer), t0 + ms(20));

        // quiet only from last CREATE + window
        assert_eq!(t.state_at(t0 + ms(50)), CompletionState::Pending { pending: 0 });
        assert_eq!(t.state_at(t0 + ms(110)), CompletionState::Provisional);

        t.input_finished_at(t0 + ms(300));
        assert_eq!(t.state_at(t0 + ms(350)), CompletionState::Provisional);
        assert_eq!(t.state_at(t0 + ms(400)), CompletionState::Complete);
    }

    #[test]
    fn test_new_create_reopens_run() {
        let (mut t, t0) = tracker();
        t.observe_at(&Event::create("a", "run", EventOrigin::Producer), t0);
        t.observe_at(&Event::finished("a", "run", EventOrigin::Writer), t0);
        t.input_finished_at(t0);
        assert_eq!(t.state_at(t0 + ms(200)), CompletionState::Complete);

        t.observe_at(&Event::create("a-1", "run", EventOrigin::Executor), t0 + ms(200));
        assert_eq!(t.state_at(t0 + ms(250)), CompletionState::Pending { pending: 1 });
    }

    #[test]
    fn test_first_failure_message_wins() {
        let (mut t, t0) = tracker();
        t.observe_at(&Event::create("r", "run", EventOrigin::Producer), t0);
        t.observe_at(&Event::failed("r", "run", EventOrigin::Executor, "parse: bad"), t0);
        t.observe_at(
            &Event::finished("r", "run", EventOrigin::Writer)
                .with_status(EventStatus::Failure)
                .with_message("writer saw tombstone"),
            t0,
        );

        assert_eq!(t.failures().get("r").map(String::as_str), Some("parse: bad"));
        assert_eq!(t.counts().failed, 1);
        assert_eq!(t.counts().succeeded, 0);
    }

    #[test]
    fn test_other_runs_ignored() {
        let (mut t, t0) = tracker();
        t.observe_at(&Event::create("a", "other", EventOrigin::Producer), t0);
        assert_eq!(t.counts(), RunCounts::default());
    }
}
