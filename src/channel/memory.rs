//! # In-process channel backend.
//!
//! [`MemoryChannel`] is a bounded tokio mpsc queue whose receiver sits behind a
//! mutex, so any number of executors or writers can compete for messages:
//!
//! ```text
//! publish ──► mpsc::Sender ──► [bounded buffer] ──► Mutex<Receiver> ◄── receive (task 1)
//!                                                                  ◄── receive (task 2)
//! ```
//!
//! Closing is signalled through a [`CancellationToken`] so that blocked
//! publishers and receivers wake up immediately.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::{Channel, ChannelFactory, ChannelRole, ChannelSet};
use crate::error::ChannelError;

/// Bounded in-memory FIFO for one channel role.
pub struct MemoryChannel<T> {
    role: ChannelRole,
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    closed: CancellationToken,
}

impl<T: Send + 'static> MemoryChannel<T> {
    /// Creates a channel with the given capacity (min 1).
    pub fn new(role: ChannelRole, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            role,
            tx,
            rx: Mutex::new(rx),
            closed: CancellationToken::new(),
        }
    }

    fn closed_error(&self) -> ChannelError {
        ChannelError::Closed { role: self.role }
    }

    fn drain_one(&self, rx: &mut mpsc::Receiver<T>) -> Result<Option<T>, ChannelError> {
        match rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(_) => Err(self.closed_error()),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Channel<T> for MemoryChannel<T> {
    fn role(&self) -> ChannelRole {
        self.role
    }

    async fn publish(&self, msg: T) -> Result<(), ChannelError> {
        if self.closed.is_cancelled() {
            return Err(self.closed_error());
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(self.closed_error()),
            sent = self.tx.send(msg) => sent.map_err(|_| self.closed_error()),
        }
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<T>, ChannelError> {
        let wait = async {
            let mut rx = self.rx.lock().await;
            if self.closed.is_cancelled() {
                return self.drain_one(&mut rx);
            }
            tokio::select! {
                biased;
                msg = rx.recv() => msg.map(Some).ok_or_else(|| self.closed_error()),
                _ = self.closed.cancelled() => self.drain_one(&mut rx),
            }
        };
        match time::timeout(timeout, wait).await {
            Ok(res) => res,
            Err(_) => Ok(None),
        }
    }

    async fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(role = %self.role, "closing memory channel");
            self.closed.cancel();
        }
    }
}

/// Opens fresh in-memory channels for every run.
#[derive(Clone, Debug)]
pub struct MemoryChannelFactory {
    capacity: usize,
}

impl MemoryChannelFactory {
    /// Creates a factory whose channels hold up to `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

#[async_trait]
impl ChannelFactory for MemoryChannelFactory {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, run_id: &str) -> Result<ChannelSet, ChannelError> {
        debug!(run_id, capacity = self.capacity, "opening memory channels");
        Ok(ChannelSet {
            source: std::sync::Arc::new(MemoryChannel::new(ChannelRole::Source, self.capacity)),
            destination: std::sync::Arc::new(MemoryChannel::new(
                ChannelRole::Destination,
                self.capacity,
            )),
            events: std::sync::Arc::new(MemoryChannel::new(ChannelRole::Events, self.capacity)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const WAIT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_fifo_order() {
        let ch = MemoryChannel::new(ChannelRole::Source, 8);
        for n in 0..3 {
            ch.publish(n).await.unwrap();
        }
        for n in 0..3 {
            assert_eq!(ch.receive(WAIT).await.unwrap(), Some(n));
        }
    }

    #[tokio::test]
    async fn test_receive_times_out_with_none() {
        let ch: MemoryChannel<u32> = MemoryChannel::new(ChannelRole::Events, 1);
        assert_eq!(ch.receive(Duration::from_millis(10)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_drains_then_reports_closed() {
        let ch = MemoryChannel::new(ChannelRole::Destination, 4);
        ch.publish("a").await.unwrap();
        ch.close().await;

        assert!(matches!(ch.publish("b").await, Err(ChannelError::Closed { .. })));
        assert_eq!(ch.receive(WAIT).await.unwrap(), Some("a"));
        assert!(matches!(ch.receive(WAIT).await, Err(ChannelError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_publisher() {
        let ch = Arc::new(MemoryChannel::new(ChannelRole::Source, 1));
        ch.publish(1).await.unwrap();

        let blocked = {
            let ch = Arc::clone(&ch);
            tokio::spawn(async move { ch.publish(2).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        ch.close().await;

        let res = blocked.await.unwrap();
        assert!(matches!(res, Err(ChannelError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_competing_receivers_each_get_distinct_messages() {
        let ch = Arc::new(MemoryChannel::new(ChannelRole::Source, 64));
        for n in 0..20u32 {
            ch.publish(n).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let ch = Arc::clone(&ch);
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Ok(Some(n)) = ch.receive(Duration::from_millis(20)).await {
                    got.push(n);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.await.unwrap());
        }
        all.sort_unstable();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }
}
