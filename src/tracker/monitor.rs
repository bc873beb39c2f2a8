//! # Run monitor: the task that owns a run's [`CompletionTracker`].
//!
//! ```text
//! events channel ──► receive(poll_timeout) ──► tracker.observe ──► SubscriberSet::emit
//!                                                    │
//! producer ──► watch<InputState> ────────────────────┤
//!                                                    ▼
//!                                  state() == Complete ──► RunReport (Completed)
//!                        token cancelled / events closed ──► RunReport (Cancelled)
//! ```
//!
//! Progress is logged every `log_interval` while the run is not complete.
//! When a [`Backlog`] sender is attached, it is refreshed after every event so
//! publishers can hold back while too many records are outstanding.

use std::time::{Duration, SystemTime};

use tokio::sync::watch;
use tokio::{select, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::ChannelRef;
use crate::config::Config;
use crate::error::ChannelError;
use crate::events::Event;
use crate::subscribers::SubscriberSet;
use crate::tracker::{CompletionState, CompletionTracker, RunOutcome, RunReport};

/// Producer side of a run, as seen by the monitor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputState {
    /// The producer may still publish.
    Open,
    /// The producer finished normally.
    Done,
    /// The producer returned an error; no more input will come.
    Failed(String),
}

/// Outstanding work as last seen by the monitor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Backlog {
    /// Records created but not yet terminal.
    pub pending: usize,
    /// Producer `CREATE` events observed so far.
    pub published: u64,
}

/// Consumes a run's event channel until the run completes or is cancelled.
pub struct RunMonitor {
    tracker: CompletionTracker,
    events: ChannelRef<Event>,
    subscribers: SubscriberSet,
    input: watch::Receiver<InputState>,
    backlog: Option<watch::Sender<Backlog>>,
    poll_timeout: Duration,
    log_interval: Option<Duration>,
    started_at: SystemTime,
}

impl RunMonitor {
    /// Creates a monitor for `run_id`.
    pub fn new(
        run_id: &str,
        events: ChannelRef<Event>,
        subscribers: SubscriberSet,
        input: watch::Receiver<InputState>,
        cfg: &Config,
    ) -> Self {
        Self {
            tracker: CompletionTracker::new(run_id, cfg.confirmation, cfg.quiescence_window),
            events,
            subscribers,
            input,
            backlog: None,
            poll_timeout: cfg.poll_timeout,
            log_interval: cfg.progress_interval(),
            started_at: SystemTime::now(),
        }
    }

    /// Publishes the backlog to `tx` after every observed event.
    pub fn with_backlog(mut self, tx: watch::Sender<Backlog>) -> Self {
        self.backlog = Some(tx);
        self
    }

    /// Runs until completion or cancellation and returns the run report.
    pub async fn run(mut self, token: CancellationToken) -> RunReport {
        let run_id = self.tracker.run_id().to_owned();
        let mut last_progress = Instant::now();
        let mut producer_error = None;

        let outcome = loop {
            let received = select! {
                _ = token.cancelled() => break RunOutcome::Cancelled,
                r = self.events.receive(self.poll_timeout) => r,
            };
            match received {
                Ok(Some(event)) => {
                    self.tracker.observe(&event);
                    if let Some(tx) = &self.backlog {
                        tx.send_replace(Backlog {
                            pending: self.tracker.pending_len(),
                            published: self.tracker.counts().published,
                        });
                    }
                    self.subscribers.emit(&event);
                }
                Ok(None) => {}
                Err(ChannelError::Closed { .. }) => {
                    warn!(%run_id, "event channel closed before completion");
                    break RunOutcome::Cancelled;
                }
                Err(e) => warn!(%run_id, error = %e, "event receive failed"),
            }

            if !self.tracker.is_input_finished() {
                let input = self.input.borrow().clone();
                match input {
                    InputState::Open => {}
                    InputState::Done => {
                        debug!(%run_id, "end of input");
                        self.tracker.input_finished();
                    }
                    InputState::Failed(error) => {
                        warn!(%run_id, %error, "producer failed; treating as end of input");
                        producer_error = Some(error);
                        self.tracker.input_finished();
                    }
                }
            }

            let state = self.tracker.state();
            if state == CompletionState::Complete {
                break RunOutcome::Completed;
            }
            if let Some(every) = self.log_interval {
                if last_progress.elapsed() >= every {
                    last_progress = Instant::now();
                    let counts = self.tracker.counts();
                    info!(
                        %run_id,
                        created = counts.created,
                        terminal = counts.terminal(),
                        pending = self.tracker.pending_len(),
                        input_done = self.tracker.is_input_finished(),
                        "waiting for run to complete"
                    );
                }
            }
        };

        let counts = self.tracker.counts();
        self.subscribers.shutdown().await;
        let report = RunReport {
            run_id,
            outcome,
            counts,
            failures: self.tracker.into_failures(),
            producer_error,
            started_at: self.started_at,
            ended_at: SystemTime::now(),
        };
        info!(
            run_id = %report.run_id,
            outcome = report.outcome.as_label(),
            published = counts.published,
            created = counts.created,
            succeeded = counts.succeeded,
            failed = counts.failed,
            dropped = counts.dropped,
            elapsed = ?report.duration(),
            "run finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::channel::{Channel, MemoryChannel, ChannelRole};
    use crate::events::EventOrigin;

    fn cfg() -> Config {
        Config {
            poll_timeout: Duration::from_millis(10),
            quiescence_window: Duration::from_millis(30),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_completes_after_input_done() {
        let events: ChannelRef<Event> = Arc::new(MemoryChannel::new(ChannelRole::Events, 16));
        let (tx, rx) = watch::channel(InputState::Open);
        let monitor = RunMonitor::new("run", events.clone(), SubscriberSet::empty(), rx, &cfg());
        let handle = tokio::spawn(monitor.run(CancellationToken::new()));

        events
            .publish(Event::create("a", "run", EventOrigin::Producer))
            .await
            .unwrap();
        events
            .publish(Event::finished("a", "run", EventOrigin::Writer))
            .await
            .unwrap();
        tx.send_replace(InputState::Done);

        let report = handle.await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.counts.published, 1);
        assert_eq!(report.counts.succeeded, 1);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_backlog_follows_observed_events() {
        let events: ChannelRef<Event> = Arc::new(MemoryChannel::new(ChannelRole::Events, 16));
        let (_tx, rx) = watch::channel(InputState::Open);
        let (backlog_tx, mut backlog) = watch::channel(Backlog::default());
        let token = CancellationToken::new();
        let monitor = RunMonitor::new("run", events.clone(), SubscriberSet::empty(), rx, &cfg())
            .with_backlog(backlog_tx);
        let handle = tokio::spawn(monitor.run(token.clone()));

        for id in ["a", "b"] {
            events
                .publish(Event::create(id, "run", EventOrigin::Producer))
                .await
                .unwrap();
        }
        events
            .publish(Event::finished("a", "run", EventOrigin::Writer))
            .await
            .unwrap();

        let seen = *backlog
            .wait_for(|b| b.published == 2 && b.pending == 1)
            .await
            .unwrap();
        assert_eq!(seen, Backlog { pending: 1, published: 2 });
        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_reports_cancelled_and_producer_error() {
        let events: ChannelRef<Event> = Arc::new(MemoryChannel::new(ChannelRole::Events, 16));
        let (tx, rx) = watch::channel(InputState::Open);
        let token = CancellationToken::new();
        let monitor = RunMonitor::new("run", events.clone(), SubscriberSet::empty(), rx, &cfg());
        let handle = tokio::spawn(monitor.run(token.clone()));

        events
            .publish(Event::create("a", "run", EventOrigin::Producer))
            .await
            .unwrap();
        tx.send_replace(InputState::Failed("source unreachable".into()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let report = handle.await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(report.producer_error.as_deref(), Some("source unreachable"));
    }
}
