//! # WriterRunner: batches destination records into a [`Writer`].
//!
//! ```text
//! destination ──► receive ──► Batch ──(size | timeout | stop)──► write_batch
//!                                                                   │
//!                     ┌─────────────────────────────────────────────┤
//!                     ▼                                             ▼
//!          Ok(failures): FINISH per record                Err: FINISH/failure
//!          success, or failure for rejected ids           for the whole batch
//!          and tombstones
//!          (error annotations alone do not fail a record)
//! ```
//!
//! ## Rules
//! - Nothing is redelivered: a failed record stays failed for the run.
//! - On cancellation the pending batch is written before the writer closes;
//!   events that cannot be published without waiting are then dropped.

use std::collections::HashMap;
use std::time::Duration;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::ChannelSet;
use crate::config::Config;
use crate::error::{ChannelError, WriteError};
use crate::events::{Event, EventOrigin, EventStatus};
use crate::policies::RetryPolicy;
use crate::record::Record;
use crate::writer::{Batch, Writer, WriterFactory};

/// Drives one [`Writer`] from the destination channel.
pub struct WriterRunner {
    id: usize,
    writer: Box<dyn Writer>,
    channels: ChannelSet,
    batch: Batch,
    poll_timeout: Duration,
    retry: RetryPolicy,
    stop: CancellationToken,
}

impl WriterRunner {
    /// Creates a runner around `writer`.
    pub fn new(id: usize, writer: Box<dyn Writer>, channels: ChannelSet, cfg: &Config) -> Self {
        Self {
            id,
            writer,
            channels,
            batch: Batch::new(cfg.batch_size_clamped(), cfg.batch_timeout),
            poll_timeout: cfg.poll_timeout,
            retry: cfg.retry,
            stop: CancellationToken::new(),
        }
    }

    /// Builds the writer from `factory` and wraps it.
    pub fn build(
        id: usize,
        factory: &WriterFactory,
        channels: ChannelSet,
        cfg: &Config,
    ) -> Result<Self, WriteError> {
        Ok(Self::new(id, factory()?, channels, cfg))
    }

    /// Receive loop; returns when `token` is cancelled or the destination is closed.
    pub async fn run(mut self, token: CancellationToken) {
        self.stop = token.clone();
        info!(writer = self.writer.name(), id = self.id, "writer started");

        loop {
            let wait = self
                .batch
                .remaining()
                .map_or(self.poll_timeout, |left| left.min(self.poll_timeout));
            let received = select! {
                _ = token.cancelled() => break,
                r = self.channels.destination.receive(wait) => r,
            };

            match received {
                Ok(Some(record)) => {
                    if let Some(full) = self.batch.add(record) {
                        self.write(full).await;
                    }
                }
                Ok(None) => {}
                Err(ChannelError::Closed { .. }) => break,
                Err(e) => {
                    warn!(writer = self.writer.name(), error = %e, "destination receive failed");
                    select! {
                        _ = token.cancelled() => break,
                        _ = time::sleep(self.poll_timeout) => {}
                    }
                }
            }

            if let Some(expired) = self.batch.flush_if_expired() {
                self.write(expired).await;
            }
        }

        let rest = self.batch.flush();
        if !rest.is_empty() {
            self.write(rest).await;
        }
        if let Err(e) = self.writer.close().await {
            warn!(writer = self.writer.name(), error = %e, "writer close failed");
        }
        info!(writer = self.writer.name(), id = self.id, "writer stopped");
    }

    /// Writes one batch and reports a `FINISH` event per record.
    pub async fn write(&self, records: Vec<Record>) {
        let name = self.writer.name();
        match self.writer.write_batch(&records).await {
            Ok(failures) => {
                let rejected: HashMap<&str, &str> = failures
                    .iter()
                    .map(|f| (f.id.as_str(), f.reason.as_str()))
                    .collect();
                let mut failed = 0usize;
                for record in &records {
                    let event = if let Some(reason) = rejected.get(record.id()) {
                        Self::confirm(record).map(|e| {
                            e.with_status(EventStatus::Failure)
                                .with_message(format!("{name}: {reason}"))
                        })
                    } else if record.is_tombstone() {
                        Self::confirm(record).map(|e| {
                            e.with_status(EventStatus::Failure)
                                .with_message(record.errors().join("; "))
                        })
                    } else {
                        Self::confirm(record)
                    };
                    if let Some(event) = event {
                        failed += usize::from(event.is_failure());
                        self.emit(event).await;
                    }
                }
                debug!(writer = name, size = records.len(), failed, "batch written");
            }
            Err(e) => {
                error!(writer = name, size = records.len(), error = %e, "batch write failed");
                for record in &records {
                    if let Some(event) = Self::confirm(record) {
                        self.emit(
                            event
                                .with_status(EventStatus::Failure)
                                .with_message(format!("{name}: {e}")),
                        )
                        .await;
                    }
                }
            }
        }
    }

    fn confirm(record: &Record) -> Option<Event> {
        match record.run_id() {
            Some(run_id) => Some(Event::finished(record.id(), run_id, EventOrigin::Writer)),
            None => {
                warn!(record_id = record.id(), "written record has no run id; no event emitted");
                None
            }
        }
    }

    async fn emit(&self, event: Event) {
        let sent = select! {
            biased;
            r = self.retry.run("publish event", || self.channels.events.publish(event.clone())) => r,
            _ = self.stop.cancelled() => {
                debug!(writer = self.writer.name(), event = %event.describe(), "writer stopped; event dropped");
                return;
            }
        };
        match sent {
            Ok(()) => {}
            Err(ChannelError::Closed { .. }) if self.stop.is_cancelled() => {
                debug!(writer = self.writer.name(), event = %event.describe(), "writer stopped; event dropped");
            }
            Err(e) => {
                error!(writer = self.writer.name(), event = %event.describe(), error = %e, "event publish failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::channel::{ChannelFactory, MemoryChannelFactory};
    use crate::events::EventKind;
    use crate::writer::{MemoryWriter, WriteFailure};

    struct RejectOdd;

    #[async_trait]
    impl Writer for RejectOdd {
        fn name(&self) -> &str {
            "reject-odd"
        }

        async fn write_batch(&self, records: &[Record]) -> Result<Vec<WriteFailure>, WriteError> {
            Ok(records
                .iter()
                .filter(|r| r.get_int("n").is_some_and(|n| n % 2 == 1))
                .map(|r| WriteFailure::new(r.id(), "odd"))
                .collect())
        }
    }

    struct Down;

    #[async_trait]
    impl Writer for Down {
        fn name(&self) -> &str {
            "down"
        }

        async fn write_batch(&self, _: &[Record]) -> Result<Vec<WriteFailure>, WriteError> {
            Err(WriteError::Connection("refused".into()))
        }
    }

    fn rec(id: &str, n: i64) -> Record {
        let mut r = Record::new(id).unwrap();
        r.initialize_run_id("run").unwrap();
        r.set_field("n", n).unwrap();
        r
    }

    async fn events(channels: &ChannelSet) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(e) = channels
            .events
            .receive(Duration::from_millis(10))
            .await
            .unwrap()
        {
            out.push(e);
        }
        out
    }

    async fn runner(writer: Box<dyn Writer>) -> (WriterRunner, ChannelSet) {
        let channels = MemoryChannelFactory::new(64).open("run").await.unwrap();
        let cfg = Config {
            retry: RetryPolicy::never(),
            ..Config::default()
        };
        (WriterRunner::new(0, writer, channels.clone(), &cfg), channels)
    }

    #[tokio::test]
    async fn test_partial_failure_events() {
        let (runner, channels) = runner(Box::new(RejectOdd)).await;
        let tomb = rec("t", 2).to_tombstone("parse: bad");
        runner.write(vec![rec("a", 1), rec("b", 2), tomb]).await;

        let evs = events(&channels).await;
        assert_eq!(evs.len(), 3);
        assert!(evs.iter().all(|e| e.kind() == EventKind::Finish && e.origin() == EventOrigin::Writer));
        assert_eq!(evs[0].status(), EventStatus::Failure);
        assert_eq!(evs[0].message(), Some("reject-odd: odd"));
        assert_eq!(evs[1].status(), EventStatus::Success);
        assert_eq!(evs[2].message(), Some("parse: bad"));
    }

    #[tokio::test]
    async fn test_error_annotations_do_not_fail_written_record() {
        let memory = MemoryWriter::new();
        let (runner, channels) = runner(Box::new(memory.clone())).await;
        let mut annotated = Record::new("ok").unwrap();
        annotated.initialize_run_id("run").unwrap();
        annotated.add_error("date field unparseable; left as is");
        runner.write(vec![annotated]).await;

        let evs = events(&channels).await;
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].status(), EventStatus::Success);
        assert!(memory.get("ok").is_some());
    }

    #[tokio::test]
    async fn test_total_failure_fails_whole_batch() {
        let (runner, channels) = runner(Box::new(Down)).await;
        runner.write(vec![rec("a", 1), rec("b", 2)]).await;

        let evs = events(&channels).await;
        assert_eq!(evs.len(), 2);
        assert!(evs.iter().all(Event::is_failure));
    }

    #[tokio::test]
    async fn test_run_flushes_on_cancel() {
        let memory = MemoryWriter::new();
        let (runner, channels) = runner(Box::new(memory.clone())).await;
        let token = CancellationToken::new();

        channels.destination.publish(rec("a", 1)).await.unwrap();
        let handle = tokio::spawn(runner.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        handle.await.unwrap();

        assert!(memory.get("a").is_some());
        assert_eq!(events(&channels).await.len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_flush_does_not_wait_on_full_event_channel() {
        let memory = MemoryWriter::new();
        let channels = MemoryChannelFactory::new(1).open("run").await.unwrap();
        let runner = WriterRunner::new(0, Box::new(memory.clone()), channels.clone(), &Config::default());
        let token = CancellationToken::new();

        channels
            .events
            .publish(Event::create("filler", "run", EventOrigin::Producer))
            .await
            .unwrap();
        channels.destination.publish(rec("a", 1)).await.unwrap();
        let handle = tokio::spawn(runner.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("writer must stop after cancellation")
            .unwrap();
        assert!(memory.get("a").is_some());
    }

    #[tokio::test]
    async fn test_build_propagates_factory_error() {
        let channels = MemoryChannelFactory::new(4).open("run").await.unwrap();
        let factory: WriterFactory = Arc::new(|| Err(WriteError::Config("missing url".into())));
        let err = WriterRunner::build(0, &factory, channels, &Config::default()).err().unwrap();
        assert_eq!(err.as_label(), "write_config");
    }
}
