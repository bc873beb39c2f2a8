//! # Producer-facing handle to a run's source channel.
//!
//! ```text
//! publish(rec) ─► stamp run id ─► [wait: backlog < max_pending] ─► CREATE (producer) ─► source channel
//!                                                        │ failure
//!                                                        ▼
//!                                                 FAIL (producer), Err
//! finish() ─► end of input (watch) ─► tracker
//! ```
//!
//! The backlog is the tracker's pending count plus the `CREATE` events this
//! publisher emitted that the tracker has not observed yet.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{debug, error};

use crate::channel::ChannelRef;
use crate::error::PublishError;
use crate::events::{Event, EventOrigin};
use crate::policies::RetryPolicy;
use crate::record::Record;
use crate::tracker::{Backlog, InputState};

/// Backlog limit a publisher waits on before each record.
pub(crate) struct Throttle {
    pub(crate) limit: usize,
    pub(crate) backlog: watch::Receiver<Backlog>,
}

struct Inner {
    run_id: String,
    source: ChannelRef<Record>,
    events: ChannelRef<Event>,
    retry: RetryPolicy,
    finished: AtomicBool,
    published: AtomicU64,
    announced: AtomicU64,
    input: watch::Sender<InputState>,
    throttle: Option<Throttle>,
}

/// Cloneable handle a producer uses to feed its run.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<Inner>,
}

impl Publisher {
    pub(crate) fn new(
        run_id: impl Into<String>,
        source: ChannelRef<Record>,
        events: ChannelRef<Event>,
        retry: RetryPolicy,
        input: watch::Sender<InputState>,
        throttle: Option<Throttle>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                run_id: run_id.into(),
                source,
                events,
                retry,
                finished: AtomicBool::new(false),
                published: AtomicU64::new(0),
                announced: AtomicU64::new(0),
                input,
                throttle,
            }),
        }
    }

    /// Id of the run being fed.
    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    /// Number of records published so far.
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }

    /// Returns `true` once end of input was signalled.
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    /// Attaches `record` to the run and publishes it on the source channel.
    ///
    /// The `CREATE` event is emitted before the record can reach an executor.
    /// If the source publish fails after retries, a `FAIL` event closes the
    /// record's lifecycle and the error is returned.
    pub async fn publish(&self, mut record: Record) -> Result<(), PublishError> {
        let inner = &self.inner;
        if self.is_finished() {
            return Err(PublishError::InputFinished {
                run_id: inner.run_id.clone(),
            });
        }
        record.initialize_run_id(&inner.run_id)?;
        let id = record.id().to_owned();
        self.wait_for_room().await;

        let created = Event::create(&id, &inner.run_id, EventOrigin::Producer);
        inner
            .retry
            .run("publish event", || inner.events.publish(created.clone()))
            .await?;
        inner.announced.fetch_add(1, Ordering::AcqRel);

        let sent = inner
            .retry
            .run("publish source", || inner.source.publish(record.clone()))
            .await;
        if let Err(e) = sent {
            error!(run_id = %inner.run_id, record_id = %id, error = %e, "source publish failed");
            let failed = Event::failed(
                &id,
                &inner.run_id,
                EventOrigin::Producer,
                format!("source publish failed: {e}"),
            );
            if let Err(e) = inner.events.publish(failed).await {
                error!(run_id = %inner.run_id, record_id = %id, error = %e, "event publish failed");
            }
            return Err(e.into());
        }

        inner.published.fetch_add(1, Ordering::Relaxed);
        debug!(run_id = %inner.run_id, record_id = %id, "record published");
        Ok(())
    }

    async fn wait_for_room(&self) {
        let inner = &self.inner;
        let Some(throttle) = &inner.throttle else {
            return;
        };
        let limit = throttle.limit as u64;
        let outstanding = |b: &Backlog| {
            let unseen = inner.announced.load(Ordering::Acquire).saturating_sub(b.published);
            b.pending as u64 + unseen
        };

        let mut backlog = throttle.backlog.clone();
        if outstanding(&*backlog.borrow()) < limit {
            return;
        }
        debug!(run_id = %inner.run_id, limit, "backlog full; publish waiting");
        // a dropped sender means the run is over; the publish then fails on its own
        let _ = backlog.wait_for(|b| outstanding(b) < limit).await;
    }

    /// Signals end of input. Idempotent.
    pub fn finish(&self) {
        if !self.inner.finished.swap(true, Ordering::AcqRel) {
            self.inner.input.send_replace(InputState::Done);
        }
    }

    /// Signals end of input caused by a producer error.
    pub(crate) fn fail(&self, error: String) {
        if !self.inner.finished.swap(true, Ordering::AcqRel) {
            self.inner.input.send_replace(InputState::Failed(error));
        }
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("run_id", &self.inner.run_id)
            .field("published", &self.published())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::channel::{ChannelFactory, ChannelSet, MemoryChannelFactory};
    use crate::events::EventKind;

    async fn publisher() -> (Publisher, ChannelSet, watch::Receiver<InputState>) {
        let channels = MemoryChannelFactory::new(8).open("run").await.unwrap();
        let (tx, rx) = watch::channel(InputState::Open);
        let p = Publisher::new(
            "run",
            channels.source.clone(),
            channels.events.clone(),
            RetryPolicy::never(),
            tx,
            None,
        );
        (p, channels, rx)
    }

    #[tokio::test]
    async fn test_publish_stamps_run_and_emits_create() {
        let (p, channels, _rx) = publisher().await;
        p.publish(Record::new("a").unwrap()).await.unwrap();

        let rec = channels.source.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(rec.run_id(), Some("run"));
        let ev = channels.events.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(ev.kind(), EventKind::Create);
        assert_eq!(ev.origin(), EventOrigin::Producer);
        assert_eq!(p.published(), 1);
    }

    #[tokio::test]
    async fn test_foreign_run_id_rejected() {
        let (p, _channels, _rx) = publisher().await;
        let mut rec = Record::new("a").unwrap();
        rec.initialize_run_id("other").unwrap();
        let err = p.publish(rec).await.unwrap_err();
        assert_eq!(err.as_label(), "publish_record");
    }

    #[tokio::test]
    async fn test_closed_source_fails_record() {
        let (p, channels, _rx) = publisher().await;
        channels.source.close().await;

        let err = p.publish(Record::new("a").unwrap()).await.unwrap_err();
        assert_eq!(err.as_label(), "publish_channel");

        let _create = channels.events.receive(Duration::from_millis(10)).await.unwrap();
        let fail = channels.events.receive(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(fail.kind(), EventKind::Fail);
    }

    #[tokio::test]
    async fn test_publish_waits_while_backlog_is_full() {
        let channels = MemoryChannelFactory::new(8).open("run").await.unwrap();
        let (input, _rx) = watch::channel(InputState::Open);
        let (backlog_tx, backlog_rx) = watch::channel(Backlog::default());
        let p = Publisher::new(
            "run",
            channels.source.clone(),
            channels.events.clone(),
            RetryPolicy::never(),
            input,
            Some(Throttle {
                limit: 2,
                backlog: backlog_rx,
            }),
        );

        p.publish(Record::new("a").unwrap()).await.unwrap();
        p.publish(Record::new("b").unwrap()).await.unwrap();
        let third = tokio::spawn({
            let p = p.clone();
            async move { p.publish(Record::new("c").unwrap()).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!third.is_finished());
        assert_eq!(p.published(), 2);

        backlog_tx.send_replace(Backlog {
            pending: 1,
            published: 2,
        });
        tokio::time::timeout(Duration::from_secs(1), third)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(p.published(), 3);
    }

    #[tokio::test]
    async fn test_finish_signals_input_once() {
        let (p, _channels, rx) = publisher().await;
        p.finish();
        p.fail("ignored".into());
        assert_eq!(*rx.borrow(), InputState::Done);

        let err = p.publish(Record::new("late").unwrap()).await.unwrap_err();
        assert_eq!(err.as_label(), "publish_input_finished");
    }
}
