//! # Runtime configuration.
//!
//! Provides [`Config`], the centralized settings for a [`Coordinator`](crate::Coordinator)
//! and the executors, writers and tracker it spawns.
//!
//! ## Sentinel values
//! - `executors = 0` → one executor per available CPU
//! - `channel_capacity = 0` → clamped to 1
//! - `batch_size = 0` → clamped to 1
//! - `log_interval = 0s` → no progress logging while a run is pending
//! - `max_pending = 0` → publishers never wait for the backlog to shrink
//!
//! `Config` deserializes with serde (durations in milliseconds, every field optional),
//! so an embedding application can load it from any format.

use std::time::Duration;

use serde::Deserialize;

#[cfg(feature = "kafka")]
use crate::channel::KafkaConfig;
use crate::policies::RetryPolicy;

/// Where executors and writers run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Executors and writers are tasks of this process; channels are in memory.
    #[default]
    Local,
    /// Executors and writers are tasks of this process; channels are the configured backend.
    Hybrid,
    /// Only the producer and tracker run here; executors and writers are separate processes.
    Distributed,
}

impl RunMode {
    /// Returns a short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunMode::Local => "local",
            RunMode::Hybrid => "hybrid",
            RunMode::Distributed => "distributed",
        }
    }

    /// Returns `true` when executors and writers are spawned by the coordinator.
    pub fn spawns_workers(&self) -> bool {
        !matches!(self, RunMode::Distributed)
    }
}

/// Which component's `FINISH` event marks a record as done.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    /// A record is done once a destination writer confirmed it.
    #[default]
    Writer,
    /// A record is done once an executor forwarded it (runs without writers).
    Executor,
}

/// Runtime configuration.
///
/// ## Field semantics
/// - `channel_capacity`: bound of each in-memory channel (min 1)
/// - `poll_timeout`: how long a `receive` waits before re-checking cancellation
/// - `quiescence_window`: silence required before a run is declared complete
/// - `executors`: executor tasks per run (`0` = available parallelism)
/// - `writers`: writer tasks per run
/// - `batch_size` / `batch_timeout`: writer batching thresholds
/// - `retry`: publish retry policy for executors, writers and producers
/// - `confirmation`: which `FINISH` events are terminal
/// - `mode`: where executors and writers run
/// - `log_interval`: progress log cadence while waiting (`0s` = off)
/// - `max_pending`: records a run may have outstanding before `publish` waits (`0` = unlimited)
///
/// ## Notes
/// Fields are public; prefer the helper accessors over sprinkling sentinel checks.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capacity of each in-memory channel.
    pub channel_capacity: usize,

    /// Receive timeout used by every polling loop.
    ///
    /// Bounds how long a cancelled executor or writer may keep waiting on an
    /// empty channel.
    #[serde(with = "duration_ms")]
    pub poll_timeout: Duration,

    /// Quiescence window of the completion tracker.
    ///
    /// A run is provisionally complete once every created record is terminal and
    /// no new record appeared for this long; it is declared complete after end
    /// of input plus one more window.
    #[serde(with = "duration_ms")]
    pub quiescence_window: Duration,

    /// Number of executor tasks (`0` = available parallelism).
    pub executors: usize,

    /// Number of writer tasks.
    pub writers: usize,

    /// Maximum records per writer batch.
    pub batch_size: usize,

    /// Maximum age of a non-empty batch before it is written.
    #[serde(with = "duration_ms")]
    pub batch_timeout: Duration,

    /// Retry policy for channel publishes.
    pub retry: RetryPolicy,

    /// Which `FINISH` events are terminal.
    pub confirmation: Confirmation,

    /// Where executors and writers run.
    pub mode: RunMode,

    /// Progress log cadence while a run is pending (`0s` = off).
    #[serde(with = "duration_ms")]
    pub log_interval: Duration,

    /// Outstanding records (created, not yet terminal) above which producers wait.
    ///
    /// Concurrent publishers may overshoot the limit by one record each.
    pub max_pending: usize,

    /// Kafka backend settings.
    #[cfg(feature = "kafka")]
    pub kafka: KafkaConfig,
}

impl Config {
    /// Returns the number of executors to spawn per run.
    ///
    /// Resolves the `0` sentinel to the available parallelism (at least 1).
    pub fn executor_count(&self) -> usize {
        match self.executors {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }

    /// Returns a channel capacity clamped to a minimum of 1.
    #[inline]
    pub fn channel_capacity_clamped(&self) -> usize {
        self.channel_capacity.max(1)
    }

    /// Returns a batch size clamped to a minimum of 1.
    #[inline]
    pub fn batch_size_clamped(&self) -> usize {
        self.batch_size.max(1)
    }

    /// Returns the publisher backlog limit, `None` when unlimited.
    #[inline]
    pub fn max_pending_limit(&self) -> Option<usize> {
        match self.max_pending {
            0 => None,
            n => Some(n),
        }
    }

    /// Returns the progress log interval as an `Option`.
    #[inline]
    pub fn progress_interval(&self) -> Option<Duration> {
        if self.log_interval.is_zero() {
            None
        } else {
            Some(self.log_interval)
        }
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `channel_capacity = 1024`
    /// - `poll_timeout = 100ms`
    /// - `quiescence_window = 500ms`
    /// - `executors = 0` (available parallelism)
    /// - `writers = 1`
    /// - `batch_size = 100`, `batch_timeout = 100ms`
    /// - `retry = RetryPolicy::default()` (5 attempts, exponential backoff)
    /// - `confirmation = Writer`, `mode = Local`
    /// - `log_interval = 5s`
    /// - `max_pending = 0` (unlimited)
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            poll_timeout: Duration::from_millis(100),
            quiescence_window: Duration::from_millis(500),
            executors: 0,
            writers: 1,
            batch_size: 100,
            batch_timeout: Duration::from_millis(100),
            retry: RetryPolicy::default(),
            confirmation: Confirmation::default(),
            mode: RunMode::default(),
            log_interval: Duration::from_secs(5),
            max_pending: 0,
            #[cfg(feature = "kafka")]
            kafka: KafkaConfig::default(),
        }
    }
}

/// Serde adapter for durations written as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
