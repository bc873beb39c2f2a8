//! # Record processing pipeline.
//!
//! - [`Step`] / [`StepOutput`]: the transform plugin contract.
//! - [`StepRegistry`]: step type name → [`StepFactory`]; ships built-in steps.
//! - [`Pipeline`] / [`PipelineSpec`]: an ordered, validated chain of steps.
//! - [`Condition`]: per-step record filters; unmatched records skip the step.
//! - [`Executor`]: pulls from the source channel and runs a pipeline per record.

mod builtin;
mod chain;
mod condition;
mod executor;
mod registry;
mod step;

pub use builtin::{CopyFields, DropRecord, SetStaticValues, SplitField};
pub use chain::{Pipeline, PipelineFactory, PipelineSpec, StepSpec};
pub use condition::{conditions_match, Condition, ConditionPolicy, Operator};
pub use executor::Executor;
pub use registry::StepRegistry;
pub use step::{Step, StepConfig, StepFactory, StepOutput};
