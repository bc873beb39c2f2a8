//! # Run coordination.
//!
//! - [`Coordinator`] / [`CoordinatorBuilder`]: single-active-run lifecycle.
//! - [`Producer`] / [`ProducerFn`]: the input side of a run.
//! - [`Publisher`]: the handle producers publish through.
//! - [`StartOutcome`], [`AwaitOutcome`], [`RunStatus`]: what callers observe.

mod builder;
#[allow(clippy::module_inception)]
mod coordinator;
mod producer;
mod publisher;
mod status;

pub use builder::CoordinatorBuilder;
pub use coordinator::Coordinator;
pub use producer::{BoxProduceFuture, Producer, ProducerFn, ProducerRef};
pub use publisher::Publisher;
pub(crate) use publisher::Throttle;
pub use status::{AwaitOutcome, RunState, RunStatus, StartOutcome};
