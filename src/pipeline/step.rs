//! # Transform step abstraction.
//!
//! A [`Step`] consumes one [`Record`] and yields a [`StepOutput`]: a lazy,
//! finite, single-pass sequence of zero or more records.
//!
//! ```text
//! process(rec) ──► Ok(StepOutput::one(rec))          pass through / modify
//!              ──► Ok(StepOutput::none())            drop
//!              ──► Ok(StepOutput::many([rec, c1]))   fan out (children have new ids)
//!              ──► Err(StepError)                    tombstone
//! ```
//!
//! ## Rules
//! - An output with the input's id continues the input; any other id is a child.
//! - Children should be built with [`Record::derive`] so they keep the run id.
//! - `process` takes `&self`; a step instance belongs to one executor and sees
//!   one record at a time.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use pipevisor::{Record, Step, StepError, StepOutput};
//!
//! struct Uppercase;
//!
//! #[async_trait]
//! impl Step for Uppercase {
//!     fn name(&self) -> &str { "uppercase" }
//!
//!     async fn process(&self, mut record: Record) -> Result<StepOutput, StepError> {
//!         if let Some(title) = record.get_str("title").map(str::to_uppercase) {
//!             record.set_field("title", title)?;
//!         }
//!         Ok(StepOutput::one(record))
//!     }
//! }
//! ```

use std::fmt;

use async_trait::async_trait;

use crate::error::StepError;
use crate::record::Record;

/// Configuration handed to step and writer factories.
pub type StepConfig = serde_json::Map<String, serde_json::Value>;

/// Lazy, single-pass output of one step invocation.
pub struct StepOutput(Box<dyn Iterator<Item = Record> + Send>);

impl StepOutput {
    /// The record continues unchanged in identity.
    pub fn one(record: Record) -> Self {
        Self(Box::new(std::iter::once(record)))
    }

    /// Nothing continues; the input is dropped.
    pub fn none() -> Self {
        Self(Box::new(std::iter::empty()))
    }

    /// Several records continue (input and/or children).
    pub fn many(records: Vec<Record>) -> Self {
        Self(Box::new(records.into_iter()))
    }

    /// Wraps any lazy iterator of records.
    pub fn lazy<I>(iter: I) -> Self
    where
        I: Iterator<Item = Record> + Send + 'static,
    {
        Self(Box::new(iter))
    }
}

impl Iterator for StepOutput {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        self.0.next()
    }
}

impl fmt::Debug for StepOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StepOutput(..)")
    }
}

/// One transform stage of a pipeline.
#[async_trait]
pub trait Step: Send + Sync + 'static {
    /// Unique name of the step within its pipeline.
    fn name(&self) -> &str;

    /// One-time setup before the first record (load models, open clients).
    async fn init(&mut self) -> Result<(), StepError> {
        Ok(())
    }

    /// Transforms one record.
    async fn process(&self, record: Record) -> Result<StepOutput, StepError>;

    /// Releases resources when the executor stops.
    async fn close(&self) {}
}

/// Creates step instances from configuration.
pub trait StepFactory: Send + Sync + 'static {
    /// Builds a step named `name` from `config`.
    fn create(&self, name: &str, config: &StepConfig) -> Result<Box<dyn Step>, StepError>;
}

impl<F> StepFactory for F
where
    F: Fn(&str, &StepConfig) -> Result<Box<dyn Step>, StepError> + Send + Sync + 'static,
{
    fn create(&self, name: &str, config: &StepConfig) -> Result<Box<dyn Step>, StepError> {
        self(name, config)
    }
}
