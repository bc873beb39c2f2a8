use std::sync::Arc;

use crate::channel::{ChannelFactory, MemoryChannelFactory};
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::pipeline::{Pipeline, PipelineFactory, PipelineSpec, StepRegistry};
use crate::subscribers::Subscribe;
use crate::writer::WriterFactory;

/// Builder for a [`Coordinator`].
///
/// Defaults: an empty pass-through pipeline, no writer, no subscribers, and
/// in-memory channels (the Kafka backend under `RunMode::Hybrid` or
/// `RunMode::Distributed` when the `kafka` feature is enabled).
///
/// ## Example
/// ```rust
/// use std::sync::Arc;
/// use pipevisor::{Config, CoordinatorBuilder, MemoryWriter, PipelineSpec, StepRegistry};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let sink = MemoryWriter::new();
/// let coordinator = CoordinatorBuilder::new(Config::default())
///     .with_pipeline_spec(PipelineSpec::default(), Arc::new(StepRegistry::with_builtins()))
///     .with_writer(sink.factory())
///     .build();
/// assert!(!coordinator.status().running);
/// # }
/// ```
pub struct CoordinatorBuilder {
    cfg: Config,
    channels: Option<Arc<dyn ChannelFactory>>,
    pipeline: Option<PipelineFactory>,
    writer: Option<WriterFactory>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl CoordinatorBuilder {
    /// Creates a builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            channels: None,
            pipeline: None,
            writer: None,
            subscribers: Vec::new(),
        }
    }

    /// Sets the channel backend.
    pub fn with_channels(mut self, channels: Arc<dyn ChannelFactory>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Sets the factory building one pipeline per executor.
    pub fn with_pipeline(mut self, pipeline: PipelineFactory) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Sets the pipeline from a declarative spec resolved through `registry`.
    pub fn with_pipeline_spec(self, spec: PipelineSpec, registry: Arc<StepRegistry>) -> Self {
        self.with_pipeline(spec.factory(registry))
    }

    /// Sets the factory building one writer per writer task.
    pub fn with_writer(mut self, writer: WriterFactory) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Sets record event subscribers.
    ///
    /// Each run gets its own subscriber workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the coordinator.
    pub fn build(self) -> Arc<Coordinator> {
        let channels = self
            .channels
            .unwrap_or_else(|| default_channels(&self.cfg));
        let pipeline: PipelineFactory = match self.pipeline {
            Some(pipeline) => pipeline,
            None => Arc::new(|| Ok(Pipeline::empty())),
        };
        Arc::new(Coordinator::new(
            self.cfg,
            channels,
            pipeline,
            self.writer,
            self.subscribers,
        ))
    }
}

#[cfg(feature = "kafka")]
fn default_channels(cfg: &Config) -> Arc<dyn ChannelFactory> {
    match cfg.mode {
        crate::config::RunMode::Local => {
            Arc::new(MemoryChannelFactory::new(cfg.channel_capacity_clamped()))
        }
        _ => Arc::new(crate::channel::KafkaChannelFactory::new(cfg.kafka.clone())),
    }
}

#[cfg(not(feature = "kafka"))]
fn default_channels(cfg: &Config) -> Arc<dyn ChannelFactory> {
    Arc::new(MemoryChannelFactory::new(cfg.channel_capacity_clamped()))
}
