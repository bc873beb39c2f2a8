//! # Non-blocking event fan-out to multiple subscribers.
//!
//! [`SubscriberSet`] hands each event to every subscriber through its own
//! bounded queue and worker task.
//!
//! ```text
//! emit(event)
//!     │
//!     ├──► [queue 1] ──► worker 1 ──► subscriber1.on_event()
//!     │    (bounded)         └──────► panic → error! log, keep going
//!     ├──► [queue 2] ──► worker 2 ──► subscriber2.on_event()
//!     └──► [queue N] ──► worker N ──► subscriberN.on_event()
//! ```
//!
//! ## Rules
//! - **Non-blocking**: `emit()` uses `try_send` and returns immediately
//! - **Overflow**: the event is dropped for that subscriber only, with a warning
//! - **Isolation**: a slow or panicking subscriber does not affect others
//! - **Per-subscriber FIFO**: each subscriber sees events in emission order
//!
//! `AssertUnwindSafe` is used around subscriber futures: a subscriber that
//! panics while holding a lock may leave its own state inconsistent.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::error::panic_message;
use crate::events::Event;
use crate::subscribers::Subscribe;

/// Queue side of one subscriber.
struct Lane {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
}

/// Fan-out of one run's events to a fixed set of subscribers.
pub struct SubscriberSet {
    run_id: Arc<str>,
    lanes: Vec<Lane>,
    workers: Vec<JoinHandle<()>>,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber for the events of `run_id`.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(run_id: &str, subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let run_id: Arc<str> = Arc::from(run_id);
        let mut lanes = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let (sender, rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            lanes.push(Lane {
                name: sub.name(),
                sender,
                dropped: AtomicU64::new(0),
            });
            workers.push(tokio::spawn(deliver(Arc::clone(&run_id), sub, rx)));
        }
        Self {
            run_id,
            lanes,
            workers,
        }
    }

    /// A set without subscribers.
    pub fn empty() -> Self {
        Self {
            run_id: Arc::from(""),
            lanes: Vec::new(),
            workers: Vec::new(),
        }
    }

    /// Returns `true` if there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Queues `event` for every subscriber without waiting.
    pub fn emit(&self, event: &Event) {
        if self.lanes.is_empty() {
            return;
        }
        let event = Arc::new(event.clone());
        for lane in &self.lanes {
            if let Err(e) = lane.sender.try_send(Arc::clone(&event)) {
                // Warn once per subscriber; the total is reported at shutdown.
                if lane.dropped.fetch_add(1, Ordering::Relaxed) == 0 {
                    let reason = match e {
                        mpsc::error::TrySendError::Full(_) => "queue full",
                        mpsc::error::TrySendError::Closed(_) => "worker gone",
                    };
                    warn!(run_id = %self.run_id, subscriber = lane.name, reason, "dropping events for subscriber");
                }
            }
        }
    }

    /// Closes all queues and waits for workers to drain them.
    pub async fn shutdown(self) {
        for lane in &self.lanes {
            let dropped = lane.dropped.load(Ordering::Relaxed);
            if dropped > 0 {
                warn!(run_id = %self.run_id, subscriber = lane.name, dropped, "subscriber missed events");
            }
        }
        drop(self.lanes);
        for h in self.workers {
            let _ = h.await;
        }
    }
}

async fn deliver(run_id: Arc<str>, sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>) {
    let mut delivered: u64 = 0;
    while let Some(ev) = rx.recv().await {
        let fut = sub.on_event(ev.as_ref());
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(()) => delivered += 1,
            Err(panic) => {
                let info = panic_message(panic.as_ref());
                error!(%run_id, subscriber = sub.name(), record_id = %ev.record_id(), %info, "subscriber panicked");
            }
        }
    }
    debug!(%run_id, subscriber = sub.name(), delivered, "subscriber worker stopped");
}
