//! # Coordinator: single-run lifecycle.
//!
//! ```text
//!            start(producer)                          tracker: Complete / cancel()
//!   Idle ───────────────────────► Running ──────────────────────────────────► Idle
//!    ▲   CAS running false→true      │ spawns:                                  │
//!    │                               │  - RunMonitor (tracker + subscribers)    │
//!    │   start() while Running       │  - producer task (Publisher)             │
//!    └── → Skipped                   │  - Executor ×N, WriterRunner ×M          │
//!                                    │    (unless RunMode::Distributed)         │
//!                                    └── supervise: stop workers, close ────────┘
//!                                        channels, publish RunReport
//! ```
//!
//! ## Rules
//! - At most one run is active; concurrent starts return [`StartOutcome::Skipped`].
//! - Errors returned by `start` leave the coordinator idle, and so does
//!   dropping a `start` future before it returns.
//! - While `start` is still building the run, status already reports it.
//! - `await_completion` never reports a run as finished on timeout.
//! - Workers are stopped only after the tracker declares the run complete
//!   (or the run is cancelled); each one flushes what it holds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channel::{ChannelFactory, ChannelSet};
use crate::config::{Config, Confirmation};
use crate::coordinator::{
    AwaitOutcome, ProducerRef, Publisher, RunState, RunStatus, StartOutcome, Throttle,
};
use crate::error::{panic_message, CoordinatorError};
use crate::pipeline::{Executor, Pipeline, PipelineFactory};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::tracker::{Backlog, InputState, RunMonitor, RunReport};
use crate::writer::{Writer, WriterFactory, WriterRunner};

struct ActiveRun {
    run_id: String,
    token: CancellationToken,
    done: watch::Receiver<Option<Arc<RunReport>>>,
}

/// Orchestrates runs: one producer, executors, writers and a tracker per run.
///
/// Built by [`CoordinatorBuilder`](crate::CoordinatorBuilder); share the
/// returned `Arc` between callers.
pub struct Coordinator {
    cfg: Config,
    channels: Arc<dyn ChannelFactory>,
    pipeline: PipelineFactory,
    writer: Option<WriterFactory>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    running: AtomicBool,
    active: Mutex<Option<ActiveRun>>,
    last_report: Mutex<Option<Arc<RunReport>>>,
}

impl Coordinator {
    pub(crate) fn new(
        cfg: Config,
        channels: Arc<dyn ChannelFactory>,
        pipeline: PipelineFactory,
        writer: Option<WriterFactory>,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        Self {
            cfg,
            channels,
            pipeline,
            writer,
            subscribers,
            running: AtomicBool::new(false),
            active: Mutex::new(None),
            last_report: Mutex::new(None),
        }
    }

    /// Configuration the coordinator was built with.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Starts a run fed by `producer`, unless one is already active.
    ///
    /// Returns as soon as every task of the run is spawned.
    pub async fn start(self: &Arc<Self>, producer: ProducerRef) -> Result<StartOutcome, CoordinatorError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(producer = producer.name(), "run already active; start skipped");
            return Ok(StartOutcome::Skipped);
        }

        let run_id = Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(None);
        *self.lock_active() = Some(ActiveRun {
            run_id: run_id.clone(),
            token: token.clone(),
            done: done_rx,
        });
        let guard = StartGuard {
            coordinator: self,
            armed: true,
        };

        match self.launch(&run_id, token, done_tx, producer).await {
            Ok(()) => {
                guard.disarm();
                Ok(StartOutcome::Triggered(run_id))
            }
            Err(e) => {
                error!(%run_id, error = %e, label = e.as_label(), "run failed to start");
                Err(e)
            }
        }
    }

    /// Waits up to `timeout` for the active run to end.
    pub async fn await_completion(&self, timeout: Duration) -> AwaitOutcome {
        let done = self.lock_active().as_ref().map(|run| run.done.clone());
        let Some(mut done) = done else {
            return AwaitOutcome::Idle;
        };

        let report = match time::timeout(timeout, done.wait_for(Option::is_some)).await {
            Ok(Ok(report)) => report.clone(),
            // the start that owned this run failed or was abandoned
            Ok(Err(_)) => return AwaitOutcome::Idle,
            Err(_) => return AwaitOutcome::Indeterminate,
        };
        report.map_or(AwaitOutcome::Indeterminate, AwaitOutcome::Finished)
    }

    /// Non-blocking status snapshot.
    pub fn status(&self) -> RunStatus {
        let active = self.lock_active().as_ref().map(|run| run.run_id.clone());
        let running = self.running.load(Ordering::Acquire);
        match active {
            Some(run_id) => RunStatus {
                run_id: Some(run_id),
                running,
                state: RunState::Running,
            },
            None => {
                let last = self.last_report().map(|r| r.run_id.clone());
                let state = if last.is_some() {
                    RunState::Completed
                } else {
                    RunState::NotStarted
                };
                RunStatus {
                    run_id: last,
                    running,
                    state,
                }
            }
        }
    }

    /// Cancels the active run. Returns `false` if there is none.
    pub fn cancel(&self) -> bool {
        match self.lock_active().as_ref() {
            Some(run) => {
                info!(run_id = %run.run_id, "run cancellation requested");
                run.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Report of the most recently ended run.
    pub fn last_report(&self) -> Option<Arc<RunReport>> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds and spawns every task of a run.
    ///
    /// All awaits happen before the first spawn, so dropping this future
    /// leaves nothing running.
    async fn launch(
        self: &Arc<Self>,
        run_id: &str,
        token: CancellationToken,
        done_tx: watch::Sender<Option<Arc<RunReport>>>,
        producer: ProducerRef,
    ) -> Result<(), CoordinatorError> {
        let cfg = &self.cfg;
        let local = cfg.mode.spawns_workers();

        if local && self.writer.is_none() && cfg.confirmation == Confirmation::Writer {
            return Err(CoordinatorError::MissingWriter {
                mode: cfg.mode.as_label(),
            });
        }

        let writers = self.build_writers(local).await?;
        let pipelines = if local {
            self.build_pipelines().await?
        } else {
            Vec::new()
        };

        let channels = self
            .channels
            .open(run_id)
            .await
            .map_err(|source| CoordinatorError::ChannelOpen {
                run_id: run_id.to_owned(),
                source,
            })?;

        let workers_token = token.child_token();
        let mut workers = JoinSet::new();
        let executors = pipelines.len();
        for (id, pipeline) in pipelines.into_iter().enumerate() {
            let executor = Executor::new(id, pipeline, channels.clone(), cfg);
            workers.spawn(executor.run(workers_token.child_token()));
        }
        let writer_count = writers.len();
        for (id, writer) in writers.into_iter().enumerate() {
            let runner = WriterRunner::new(id, writer, channels.clone(), cfg);
            workers.spawn(runner.run(workers_token.child_token()));
        }
        if local && writer_count == 0 {
            workers.spawn(discard_destination(
                channels.clone(),
                cfg.poll_timeout,
                workers_token.child_token(),
            ));
        }

        let (input_tx, input_rx) = watch::channel(InputState::Open);
        let mut monitor = RunMonitor::new(
            run_id,
            channels.events.clone(),
            SubscriberSet::new(run_id, self.subscribers.clone()),
            input_rx,
            cfg,
        );
        let mut throttle = None;
        if let Some(limit) = cfg.max_pending_limit() {
            let (tx, rx) = watch::channel(Backlog::default());
            monitor = monitor.with_backlog(tx);
            throttle = Some(Throttle { limit, backlog: rx });
        }
        let publisher = Publisher::new(
            run_id.to_owned(),
            channels.source.clone(),
            channels.events.clone(),
            cfg.retry,
            input_tx,
            throttle,
        );
        let producer_task = tokio::spawn(run_producer(producer, publisher, token.child_token()));

        info!(
            %run_id,
            mode = cfg.mode.as_label(),
            channels = self.channels.name(),
            executors,
            writers = writer_count,
            "run started"
        );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let tasks = RunTasks {
                token,
                workers_token,
                workers,
                producer_task,
                channels,
            };
            this.supervise(monitor, tasks, done_tx).await;
        });
        Ok(())
    }

    async fn build_writers(&self, local: bool) -> Result<Vec<Box<dyn Writer>>, CoordinatorError> {
        let Some(factory) = &self.writer else {
            return Ok(Vec::new());
        };
        let first = factory()?;
        if !first.validate_connection().await {
            return Err(CoordinatorError::WriterUnavailable {
                writer: first.name().to_owned(),
            });
        }
        if !local {
            return Ok(Vec::new());
        }

        let mut writers = vec![first];
        for _ in 1..self.cfg.writers.max(1) {
            writers.push(factory()?);
        }
        Ok(writers)
    }

    async fn build_pipelines(&self) -> Result<Vec<Pipeline>, CoordinatorError> {
        let mut pipelines = Vec::with_capacity(self.cfg.executor_count());
        for _ in 0..self.cfg.executor_count() {
            let mut pipeline = (self.pipeline)()?;
            pipeline.init().await?;
            pipelines.push(pipeline);
        }
        Ok(pipelines)
    }

    async fn supervise(
        &self,
        monitor: RunMonitor,
        mut tasks: RunTasks,
        done: watch::Sender<Option<Arc<RunReport>>>,
    ) {
        let report = Arc::new(monitor.run(tasks.token.child_token()).await);

        tasks.workers_token.cancel();
        // nothing reads events any more; closing wakes publishers blocked on full channels
        tasks.channels.close().await;
        while let Some(res) = tasks.workers.join_next().await {
            if let Err(e) = res {
                error!(run_id = %report.run_id, error = %e, "worker task failed");
            }
        }
        tasks.token.cancel();
        if !tasks.producer_task.is_finished() {
            warn!(run_id = %report.run_id, "producer still running after run end; aborting");
            tasks.producer_task.abort();
        }
        let _ = tasks.producer_task.await;

        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&report));
        *self.lock_active() = None;
        self.running.store(false, Ordering::Release);
        done.send_replace(Some(report));
    }
}

/// Resets the coordinator to idle unless the start it guards completed.
struct StartGuard<'a> {
    coordinator: &'a Coordinator,
    armed: bool,
}

impl StartGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            *self.coordinator.lock_active() = None;
            self.coordinator.running.store(false, Ordering::Release);
        }
    }
}

struct RunTasks {
    token: CancellationToken,
    workers_token: CancellationToken,
    workers: JoinSet<()>,
    producer_task: JoinHandle<()>,
    channels: ChannelSet,
}

/// Consumes forwarded records when no writer is configured.
async fn discard_destination(channels: ChannelSet, poll: Duration, token: CancellationToken) {
    let mut discarded: u64 = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            r = channels.destination.receive(poll) => match r {
                Ok(Some(_)) => discarded += 1,
                Ok(None) => {}
                Err(_) => break,
            },
        }
    }
    debug!(discarded, "destination drain stopped");
}

async fn run_producer(producer: ProducerRef, publisher: Publisher, ctx: CancellationToken) {
    let run_id = publisher.run_id().to_owned();
    let fut = producer.produce(publisher.clone(), ctx);
    let error = match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(format!("{e:#}")),
        Err(panic) => Some(format!("producer panicked: {}", panic_message(panic.as_ref()))),
    };
    match error {
        None => {
            info!(%run_id, producer = producer.name(), published = publisher.published(), "producer finished");
            publisher.finish();
        }
        Some(error) => {
            error!(%run_id, producer = producer.name(), %error, "producer failed");
            publisher.fail(error);
        }
    }
}
