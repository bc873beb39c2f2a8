//! # Executor: runs a pipeline over records pulled from the source channel.
//!
//! Each executor owns one initialized [`Pipeline`] and handles one record at a
//! time; many executors may share the same source channel.
//!
//! ```text
//! source ──► receive(poll_timeout) ──► CREATE
//!                                       │
//!                                       ▼
//!                      ┌──── step[0] ─► step[1] ─► ... ─► destination ─► FINISH
//!                      │         │
//!                      │         ├─ child ids ─► CREATE (before they travel on)
//!                      │         ├─ input id absent ─► DROP
//!                      │         └─ Err ─► FAIL + tombstone ─► destination ─► FINISH(failure)
//! ```
//!
//! ## Rules
//! - Record processing is depth-first: a record finishes the chain before its
//!   next sibling starts.
//! - A failing record is replaced by a tombstone built from its state as it
//!   entered the failing step; its siblings keep going. A step that panics,
//!   in `process` or while its output is drawn, counts as failing.
//! - Destination and event publishes go through [`RetryPolicy`]; a record whose
//!   destination publish still fails is reported with `FAIL`.
//! - Cancellation stops the receive loop; the record in hand is finished first,
//!   but publishes still waiting on a full channel are abandoned.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::ChannelSet;
use crate::config::Config;
use crate::error::{panic_message, ChannelError, PipelineError, StepError};
use crate::events::{Event, EventOrigin, EventStatus};
use crate::pipeline::{Pipeline, PipelineFactory, Step};
use crate::policies::RetryPolicy;
use crate::record::Record;

/// Pulls records, threads them through a pipeline, and forwards the results.
pub struct Executor {
    id: usize,
    pipeline: Pipeline,
    channels: ChannelSet,
    poll_timeout: Duration,
    retry: RetryPolicy,
    stop: CancellationToken,
}

impl Executor {
    /// Creates an executor around an already initialized pipeline.
    pub fn new(id: usize, pipeline: Pipeline, channels: ChannelSet, cfg: &Config) -> Self {
        Self {
            id,
            pipeline,
            channels,
            poll_timeout: cfg.poll_timeout,
            retry: cfg.retry,
            stop: CancellationToken::new(),
        }
    }

    /// Builds a pipeline from `factory`, initializes it, and wraps it in an executor.
    pub async fn build(
        id: usize,
        factory: &PipelineFactory,
        channels: ChannelSet,
        cfg: &Config,
    ) -> Result<Self, PipelineError> {
        let mut pipeline = factory()?;
        pipeline.init().await?;
        Ok(Self::new(id, pipeline, channels, cfg))
    }

    /// Executor index within its run.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Receive loop; returns when `token` is cancelled or the source is closed.
    pub async fn run(mut self, token: CancellationToken) {
        self.stop = token.clone();
        info!(executor = self.id, pipeline = %self.pipeline.name(), "executor started");
        let mut handled: u64 = 0;

        loop {
            let received = select! {
                _ = token.cancelled() => break,
                r = self.channels.source.receive(self.poll_timeout) => r,
            };

            match received {
                Ok(Some(record)) => {
                    self.handle(record).await;
                    handled += 1;
                }
                Ok(None) => continue,
                Err(ChannelError::Closed { .. }) => break,
                Err(e) => {
                    warn!(executor = self.id, error = %e, "source receive failed");
                    select! {
                        _ = token.cancelled() => break,
                        _ = time::sleep(self.poll_timeout) => {}
                    }
                }
            }
        }

        self.pipeline.close().await;
        info!(executor = self.id, handled, "executor stopped");
    }

    /// Processes one record from the source channel to its terminal events.
    pub async fn handle(&self, record: Record) {
        let Some(run_id) = record.run_id().map(str::to_owned) else {
            error!(executor = self.id, record_id = record.id(), "record without run id skipped");
            return;
        };
        self.emit(Event::create(record.id(), &run_id, EventOrigin::Executor))
            .await;

        let mut stack = vec![(record, 0usize)];
        while let Some((record, idx)) = stack.pop() {
            let Some(step) = self.pipeline.step(idx) else {
                self.forward(record, &run_id).await;
                continue;
            };

            let id = record.id().to_owned();
            let seed = record.clone();
            let output = match run_step(step, record).await {
                Ok(output) => output,
                Err(e) => {
                    let message = format!("{}: {e}", step.name());
                    warn!(
                        executor = self.id,
                        %run_id,
                        record_id = %id,
                        step = step.name(),
                        error = %e,
                        "step failed"
                    );
                    self.tombstone(seed, message, &run_id).await;
                    continue;
                }
            };

            let mut survivors = Vec::new();
            let mut kept = false;
            for mut out in output {
                if out.id() == id {
                    kept = true;
                    survivors.push(out);
                    continue;
                }
                if let Err(e) = out.initialize_run_id(&run_id) {
                    let message = format!("{}: {e}", step.name());
                    self.emit(Event::failed(out.id(), &run_id, EventOrigin::Executor, message))
                        .await;
                    continue;
                }
                debug!(%run_id, parent = %id, record_id = out.id(), step = step.name(), "child created");
                self.emit(Event::create(out.id(), &run_id, EventOrigin::Executor))
                    .await;
                survivors.push(out);
            }
            if !kept {
                debug!(%run_id, record_id = %id, step = step.name(), "record dropped");
                self.emit(Event::dropped(&id, &run_id, EventOrigin::Executor))
                    .await;
            }
            stack.extend(survivors.into_iter().rev().map(|r| (r, idx + 1)));
        }
    }

    async fn forward(&self, record: Record, run_id: &str) {
        let id = record.id().to_owned();
        let Some(published) = self
            .deliver("publish destination", || {
                self.channels.destination.publish(record.clone())
            })
            .await
        else {
            debug!(executor = self.id, run_id, record_id = %id, "executor stopped; record not forwarded");
            return;
        };
        match published {
            Ok(()) => {
                self.emit(Event::finished(&id, run_id, EventOrigin::Executor))
                    .await
            }
            Err(e) => {
                error!(executor = self.id, run_id, record_id = %id, error = %e, "destination publish failed");
                self.emit(Event::failed(
                    &id,
                    run_id,
                    EventOrigin::Executor,
                    format!("destination publish failed: {e}"),
                ))
                .await;
            }
        }
    }

    async fn tombstone(&self, seed: Record, message: String, run_id: &str) {
        let id = seed.id().to_owned();
        let tombstone = seed.to_tombstone(message.clone());
        self.emit(Event::failed(&id, run_id, EventOrigin::Executor, message.clone()))
            .await;

        let Some(published) = self
            .deliver("publish tombstone", || {
                self.channels.destination.publish(tombstone.clone())
            })
            .await
        else {
            return;
        };
        match published {
            Ok(()) => {
                self.emit(
                    Event::finished(&id, run_id, EventOrigin::Executor)
                        .with_status(EventStatus::Failure)
                        .with_message(message),
                )
                .await
            }
            Err(e) => {
                error!(executor = self.id, run_id, record_id = %id, error = %e, "tombstone publish failed")
            }
        }
    }

    async fn emit(&self, event: Event) {
        match self
            .deliver("publish event", || self.channels.events.publish(event.clone()))
            .await
        {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                error!(executor = self.id, event = %event.describe(), error = %e, "event publish failed");
            }
            None => {
                debug!(executor = self.id, event = %event.describe(), "executor stopped; event dropped");
            }
        }
    }

    /// Runs a retried publish; `None` when the executor is stopped first.
    async fn deliver<F, Fut>(&self, what: &str, op: F) -> Option<Result<(), ChannelError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), ChannelError>>,
    {
        let result = select! {
            biased;
            r = self.retry.run(what, op) => r,
            _ = self.stop.cancelled() => return None,
        };
        match result {
            Err(ChannelError::Closed { .. }) if self.stop.is_cancelled() => None,
            other => Some(other),
        }
    }
}

/// Runs `step` on `record` and draws its whole output, turning panics into errors.
async fn run_step(step: &dyn Step, record: Record) -> Result<Vec<Record>, StepError> {
    let output = match AssertUnwindSafe(step.process(record)).catch_unwind().await {
        Ok(output) => output?,
        Err(panic) => {
            return Err(StepError::Panicked {
                message: panic_message(panic.as_ref()),
            })
        }
    };
    std::panic::catch_unwind(AssertUnwindSafe(|| output.collect::<Vec<_>>())).map_err(|panic| {
        StepError::Panicked {
            message: panic_message(panic.as_ref()),
        }
    })
}
