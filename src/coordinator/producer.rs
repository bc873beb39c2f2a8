//! # Record producers.
//!
//! A [`Producer`] feeds one run: it publishes records through the
//! [`Publisher`] it is handed and returns when its input is exhausted.
//! Returning `Ok(())` (or calling [`Publisher::finish`]) signals end of input;
//! returning `Err` ends input too and is recorded in the run report.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use pipevisor::{Publisher, ProducerFn, ProducerRef, Record};
//!
//! let producer: ProducerRef = ProducerFn::arc("numbers", |publisher: Publisher, ctx: CancellationToken| async move {
//!     for n in 0..3 {
//!         if ctx.is_cancelled() {
//!             break;
//!         }
//!         publisher.publish(Record::new(format!("n-{n}"))?).await?;
//!     }
//!     Ok::<(), anyhow::Error>(())
//! });
//! assert_eq!(producer.name(), "numbers");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::coordinator::Publisher;

/// Boxed future returned by [`Producer::produce`].
pub type BoxProduceFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;

/// Shared handle to a producer.
pub type ProducerRef = Arc<dyn Producer>;

/// Source of the records of a run.
pub trait Producer: Send + Sync + 'static {
    /// Producer name for logs.
    fn name(&self) -> &str;

    /// Creates the future that publishes this run's input.
    ///
    /// The coordinator calls this once per run; `ctx` is cancelled with the run.
    fn produce(&self, publisher: Publisher, ctx: CancellationToken) -> BoxProduceFuture;
}

/// Closure-backed producer.
pub struct ProducerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> ProducerFn<F> {
    /// Wraps `f` as a producer.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self { name: name.into(), f }
    }

    /// Wraps `f` and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F, Fut> Producer for ProducerFn<F>
where
    F: Fn(Publisher, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn produce(&self, publisher: Publisher, ctx: CancellationToken) -> BoxProduceFuture {
        Box::pin((self.f)(publisher, ctx))
    }
}
