//! # Messaging channels between producers, executors and writers.
//!
//! Every run owns three logical channels:
//!
//! ```text
//!  Publisher ──► [source] ──► Executor ×N ──► [destination] ──► WriterRunner ×M
//!      │                          │                                   │
//!      └──────────────────────────┴──────────► [events] ◄─────────────┘
//!                                                  │
//!                                                  ▼
//!                                          completion tracker
//! ```
//!
//! A [`Channel`] is one of those roles for one message type. Backends:
//! - [`MemoryChannel`]: bounded in-process FIFO shared by all tasks of a run.
//! - `KafkaChannel` (feature `kafka`): one topic per role and run on a durable
//!   partitioned log.
//!
//! ## Rules
//! - `publish` surfaces failures synchronously; transient ones are retryable.
//! - `receive(timeout)` returns `Ok(None)` on timeout, never an error.
//! - After `close`, `publish` fails with `Closed` and `receive` drains what is
//!   buffered, then reports `Closed`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ChannelError;
use crate::events::Event;
use crate::record::Record;

#[cfg(feature = "kafka")]
mod kafka;
mod memory;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaChannel, KafkaChannelFactory, KafkaConfig};
pub use memory::{MemoryChannel, MemoryChannelFactory};

/// Logical role of a channel within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRole {
    /// Producer → executors.
    Source,
    /// Executors → writers.
    Destination,
    /// Everyone → completion tracker.
    Events,
}

impl ChannelRole {
    /// Returns the role name used in logs and topic names.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelRole::Source => "source",
            ChannelRole::Destination => "destination",
            ChannelRole::Events => "events",
        }
    }
}

impl fmt::Display for ChannelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message that can travel over a channel.
///
/// `key` partitions messages on backends that support it; `run_id` routes a
/// message to its run's channel when one process serves many runs.
pub trait Message: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Partitioning key.
    fn key(&self) -> &str;
    /// Run the message belongs to.
    fn run_id(&self) -> Option<&str>;
}

impl Message for Record {
    fn key(&self) -> &str {
        self.id()
    }

    fn run_id(&self) -> Option<&str> {
        Record::run_id(self)
    }
}

impl Message for Event {
    fn key(&self) -> &str {
        self.record_id()
    }

    fn run_id(&self) -> Option<&str> {
        Some(Event::run_id(self))
    }
}

/// One logical channel carrying messages of type `T`.
#[async_trait]
pub trait Channel<T: Send + 'static>: Send + Sync {
    /// Role of this channel.
    fn role(&self) -> ChannelRole;

    /// Publishes a message, waiting for capacity or broker acknowledgement.
    async fn publish(&self, msg: T) -> Result<(), ChannelError>;

    /// Waits up to `timeout` for the next message.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    async fn receive(&self, timeout: Duration) -> Result<Option<T>, ChannelError>;

    /// Closes the channel. Idempotent.
    async fn close(&self);
}

/// Shared handle to a channel.
pub type ChannelRef<T> = Arc<dyn Channel<T>>;

/// The three channels of one run.
#[derive(Clone)]
pub struct ChannelSet {
    /// Producer → executors.
    pub source: ChannelRef<Record>,
    /// Executors → writers.
    pub destination: ChannelRef<Record>,
    /// Lifecycle events → tracker.
    pub events: ChannelRef<Event>,
}

impl ChannelSet {
    /// Closes all three channels.
    pub async fn close(&self) {
        self.source.close().await;
        self.destination.close().await;
        self.events.close().await;
    }
}

/// Opens the channel set of a run.
#[async_trait]
pub trait ChannelFactory: Send + Sync + 'static {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Opens (creating if needed) the source, destination and event channels of `run_id`.
    async fn open(&self, run_id: &str) -> Result<ChannelSet, ChannelError>;
}
