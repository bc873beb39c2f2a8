//! # pipevisor
//!
//! **Pipevisor** is the coordination core of a data-ingestion pipeline.
//!
//! A producer publishes records into a run; executors pull them from a
//! source channel, thread them through an ordered chain of transform steps,
//! and forward survivors to a destination channel; writers persist them in
//! batches. Every record's lifecycle is reported as events, and a completion
//! tracker decides, from those events alone, when a run is over.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!                        ┌──────────────────────────────┐
//!                        │ Coordinator (one active run) │
//!                        └──┬──────────┬─────────────┬──┘
//!            spawns         │          │             │
//!                           ▼          ▼             ▼
//!  ┌──────────────┐  ┌─────────────┐  ┌──────────────┐  ┌─────────────────────┐
//!  │  Producer    │  │ Executor ×N │  │ WriterRunner │  │ RunMonitor          │
//!  │ (Publisher)  │  │ (Pipeline)  │  │ ×M (Writer)  │  │ (CompletionTracker) │
//!  └──────┬───────┘  └──┬───────┬──┘  └──┬────────┬──┘  └──────────▲──────────┘
//!         │             │       │        │        │                │
//!         ▼             │       ▼        │        │                │
//!     [source] ─────────┘  [destination]─┘        │                │
//!         │                     │                 │                │
//!         └────── CREATE ───────┴─ CREATE/DROP/ ──┴─ FINISH ──► [events]
//!                                  FAIL/FINISH                      │
//!                                                                   ▼
//!                                                             SubscriberSet
//! ```
//!
//! ### Record lifecycle
//! ```text
//! publish ─► CREATE ─► step ─► step ─► ... ─► destination ─► writer ─► FINISH (writer)
//!                        │
//!                        ├─ child ids ──► CREATE (child), then the rest of the chain
//!                        ├─ id absent ──► DROP
//!                        └─ Err ────────► FAIL + tombstone ─► writer ─► FINISH/failure
//! ```
//!
//! A run is complete once every created record is terminal, no record was
//! created for a quiescence window, the producer signalled end of input, and
//! that held for one more window.
//!
//! ## Features
//! | Area              | Description                                               | Key types / traits                              |
//! |-------------------|-----------------------------------------------------------|-------------------------------------------------|
//! | **Records**       | Schemaless documents with reserved identity fields.       | [`Record`], [`Value`], [`UpdateMode`]           |
//! | **Steps**         | Transform plugins and their registry.                     | [`Step`], [`StepOutput`], [`StepRegistry`]      |
//! | **Execution**     | Pipeline chains and the executor loop.                    | [`Pipeline`], [`PipelineSpec`], [`Executor`]    |
//! | **Writers**       | Batched, idempotent destination sinks.                    | [`Writer`], [`WriterRunner`], [`MemoryWriter`]  |
//! | **Channels**      | Source, destination and event transport.                  | [`Channel`], [`ChannelFactory`]                 |
//! | **Completion**    | Quiescence-based run completion and reports.              | [`CompletionTracker`], [`RunReport`]            |
//! | **Coordination**  | Single-active-run lifecycle.                              | [`Coordinator`], [`Producer`], [`Publisher`]    |
//! | **Subscriber API**| Hook into record events (logging, metrics, audit).        | [`Subscribe`]                                   |
//! | **Policies**      | Retry with backoff and jitter for channel publishes.      | [`RetryPolicy`], [`BackoffPolicy`]              |
//! | **Configuration** | Centralized runtime settings.                             | [`Config`]                                      |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//! - `kafka`: distributed channels on Kafka topics (`KafkaChannelFactory`).
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use pipevisor::{
//!     AwaitOutcome, Config, CoordinatorBuilder, MemoryWriter, PipelineSpec, ProducerFn,
//!     ProducerRef, Publisher, Record, StepRegistry, StepSpec,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.executors = 2;
//!     cfg.quiescence_window = Duration::from_millis(50);
//!
//!     let config = serde_json::json!({"values": {"source": "demo"}});
//!     let spec = PipelineSpec {
//!         name: "demo".into(),
//!         steps: vec![StepSpec::new("tag", "set_static_values")
//!             .with_config(config.as_object().cloned().unwrap_or_default())],
//!     };
//!
//!     let sink = MemoryWriter::new();
//!     let coordinator = CoordinatorBuilder::new(cfg)
//!         .with_pipeline_spec(spec, Arc::new(StepRegistry::with_builtins()))
//!         .with_writer(sink.factory())
//!         .build();
//!
//!     let producer: ProducerRef = ProducerFn::arc("docs", |publisher: Publisher, _ctx: CancellationToken| async move {
//!         for n in 0..3 {
//!             publisher.publish(Record::new(format!("doc-{n}"))?).await?;
//!         }
//!         Ok::<(), anyhow::Error>(())
//!     });
//!
//!     coordinator.start(producer).await?;
//!     if let AwaitOutcome::Finished(report) = coordinator.await_completion(Duration::from_secs(10)).await {
//!         assert_eq!(report.counts.succeeded, 3);
//!     }
//!     assert_eq!(sink.get("doc-1").and_then(|r| r.get_str("source").map(str::to_owned)).as_deref(), Some("demo"));
//!     Ok(())
//! }
//! ```
mod channel;
mod config;
mod coordinator;
mod error;
mod events;
mod pipeline;
mod policies;
mod record;
mod subscribers;
mod tracker;
mod writer;

// ---- Public re-exports ----

pub use channel::{
    Channel, ChannelFactory, ChannelRef, ChannelRole, ChannelSet, MemoryChannel,
    MemoryChannelFactory, Message,
};
pub use config::{Config, Confirmation, RunMode};
pub use coordinator::{
    AwaitOutcome, BoxProduceFuture, Coordinator, CoordinatorBuilder, Producer, ProducerFn,
    ProducerRef, Publisher, RunState, RunStatus, StartOutcome,
};
pub use error::{
    ChannelError, CodecError, CoordinatorError, PipelineError, PublishError, RecordError,
    StepError, WriteError,
};
pub use events::{Event, EventKind, EventOrigin, EventStatus};
pub use pipeline::{
    Condition, ConditionPolicy, CopyFields, DropRecord, Executor, Operator, Pipeline,
    PipelineFactory, PipelineSpec, SetStaticValues, SplitField, Step, StepConfig, StepFactory,
    StepOutput, StepRegistry, StepSpec, conditions_match,
};
pub use policies::{BackoffPolicy, JitterPolicy, RetryPolicy};
pub use record::{ERRORS_FIELD, ID_FIELD, RUN_ID_FIELD, Record, UpdateMode, Value};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tracker::{
    Backlog, CompletionState, CompletionTracker, InputState, RunCounts, RunMonitor, RunOutcome,
    RunReport,
};
pub use writer::{Batch, MemoryWriter, WriteFailure, Writer, WriterFactory, WriterRegistry, WriterRunner};

// Optional: distributed channels on Kafka.
// Enable with: `--features kafka`
#[cfg(feature = "kafka")]
pub use channel::{KafkaChannel, KafkaChannelFactory, KafkaConfig};

// Optional: built-in logging subscriber.
// Enabled by default via the `logging` feature.
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
