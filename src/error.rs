//! Error types used by the pipeline runtime and its plugins.
//!
//! One enum per concern:
//!
//! - [`RecordError`] misuse of the record model (reserved fields, run reassignment).
//! - [`CodecError`] transport encoding failures.
//! - [`ChannelError`] failures of a messaging channel backend.
//! - [`StepError`] failures raised by a transform step for a single record.
//! - [`PipelineError`] invalid pipeline assembly or step initialization.
//! - [`WriteError`] destination writer failures.
//! - [`PublishError`] failures seen by a producer while publishing.
//! - [`CoordinatorError`] failures that prevent a run from starting.
//!
//! Every enum provides `as_label` (stable snake_case label for logs/metrics).

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

use crate::channel::ChannelRole;

/// Extracts the message carried by a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// # Errors produced by the record model.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The field name is reserved and cannot be written through the field API.
    #[error("field `{field}` is reserved")]
    ReservedField {
        /// The rejected field name.
        field: String,
    },

    /// The record already belongs to another run.
    #[error("record `{id}` belongs to run `{current}`, cannot move it to `{requested}`")]
    RunIdReassigned {
        /// Record id.
        id: String,
        /// Run id already set on the record.
        current: String,
        /// Run id that was requested.
        requested: String,
    },

    /// Record ids must not be empty.
    #[error("record id must not be empty")]
    EmptyId,
}

impl RecordError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RecordError::ReservedField { .. } => "record_reserved_field",
            RecordError::RunIdReassigned { .. } => "record_run_id_reassigned",
            RecordError::EmptyId => "record_empty_id",
        }
    }
}

/// # Errors produced while encoding or decoding transport payloads.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CodecError {
    /// The payload is not valid JSON for the expected shape.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload decoded but violates a record invariant.
    #[error("invalid record payload: {0}")]
    Record(#[from] RecordError),
}

impl CodecError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CodecError::Json(_) => "codec_json",
            CodecError::Record(_) => "codec_record",
        }
    }
}

/// # Errors produced by messaging channels.
///
/// `Backend` and `Timeout` are transient and may be retried;
/// `Closed` and `Codec` are not.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The channel was closed; no more messages can be published.
    #[error("{role} channel is closed")]
    Closed {
        /// Logical role of the channel.
        role: ChannelRole,
    },

    /// A message could not be encoded or decoded.
    #[error("{role} channel codec failure: {source}")]
    Codec {
        /// Logical role of the channel.
        role: ChannelRole,
        /// Underlying codec error.
        #[source]
        source: CodecError,
    },

    /// The backend rejected the operation.
    #[error("{role} channel backend error: {error}")]
    Backend {
        /// Logical role of the channel.
        role: ChannelRole,
        /// Backend error message.
        error: String,
    },

    /// The backend did not acknowledge in time.
    #[error("{role} channel timed out after {timeout:?}")]
    Timeout {
        /// Logical role of the channel.
        role: ChannelRole,
        /// Elapsed time budget.
        timeout: Duration,
    },
}

impl ChannelError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use pipevisor::{ChannelError, ChannelRole};
    ///
    /// let err = ChannelError::Closed { role: ChannelRole::Source };
    /// assert_eq!(err.as_label(), "channel_closed");
    /// assert!(!err.is_retryable());
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ChannelError::Closed { .. } => "channel_closed",
            ChannelError::Codec { .. } => "channel_codec",
            ChannelError::Backend { .. } => "channel_backend",
            ChannelError::Timeout { .. } => "channel_timeout",
        }
    }

    /// Indicates whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::Backend { .. } | ChannelError::Timeout { .. }
        )
    }

    /// Builds a [`ChannelError::Backend`] from any displayable error.
    pub fn backend(role: ChannelRole, error: impl std::fmt::Display) -> Self {
        ChannelError::Backend {
            role,
            error: error.to_string(),
        }
    }
}

/// # Errors produced by a transform step for one record.
///
/// A step error never aborts a run: the executor converts the record
/// to a tombstone and reports it as failed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StepError {
    /// Processing of the record failed.
    #[error("{message}")]
    Failed {
        /// Human-readable failure message.
        message: String,
    },

    /// The step was given an invalid configuration.
    #[error("invalid configuration for step `{step}`: {reason}")]
    Config {
        /// Step name.
        step: String,
        /// What is wrong.
        reason: String,
    },

    /// The step misused the record API.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// The step panicked while processing the record or yielding its output.
    #[error("panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// Any other plugin error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    /// Creates a [`StepError::Failed`] with the given message.
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::Failed {
            message: message.into(),
        }
    }

    /// Creates a [`StepError::Config`] for the given step.
    pub fn config(step: impl Into<String>, reason: impl Into<String>) -> Self {
        StepError::Config {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StepError::Failed { .. } => "step_failed",
            StepError::Config { .. } => "step_config",
            StepError::Record(_) => "step_record",
            StepError::Panicked { .. } => "step_panicked",
            StepError::Other(_) => "step_other",
        }
    }
}

/// # Errors produced while assembling a pipeline.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Two steps share the same name.
    #[error("duplicate step name `{name}`")]
    DuplicateStep {
        /// Duplicated name.
        name: String,
    },

    /// No factory is registered for the step type.
    #[error("unknown step type `{kind}`; available: {available:?}")]
    UnknownStep {
        /// Requested type name.
        kind: String,
        /// Registered type names.
        available: Vec<String>,
    },

    /// A step could not be created or initialized.
    #[error("step `{name}` failed to initialize: {source}")]
    Init {
        /// Step name.
        name: String,
        /// Underlying step error.
        #[source]
        source: StepError,
    },
}

impl PipelineError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PipelineError::DuplicateStep { .. } => "pipeline_duplicate_step",
            PipelineError::UnknownStep { .. } => "pipeline_unknown_step",
            PipelineError::Init { .. } => "pipeline_init",
        }
    }
}

/// # Errors produced by destination writers.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WriteError {
    /// The destination could not be reached.
    #[error("destination unreachable: {0}")]
    Connection(String),

    /// The whole batch was rejected.
    #[error("batch write failed: {0}")]
    Batch(String),

    /// The writer was given an invalid configuration.
    #[error("invalid writer configuration: {0}")]
    Config(String),

    /// No factory is registered for the writer type.
    #[error("unknown writer type `{kind}`; available: {available:?}")]
    UnknownWriter {
        /// Requested type name.
        kind: String,
        /// Registered type names.
        available: Vec<String>,
    },
}

impl WriteError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WriteError::Connection(_) => "write_connection",
            WriteError::Batch(_) => "write_batch",
            WriteError::Config(_) => "write_config",
            WriteError::UnknownWriter { .. } => "write_unknown_writer",
        }
    }
}

/// # Errors seen by a producer while publishing records into a run.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PublishError {
    /// The record could not be attached to the run.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// The source channel rejected the record.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// End-of-input was already signalled for this run.
    #[error("input for run `{run_id}` is already finished")]
    InputFinished {
        /// Run id.
        run_id: String,
    },
}

impl PublishError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PublishError::Record(_) => "publish_record",
            PublishError::Channel(_) => "publish_channel",
            PublishError::InputFinished { .. } => "publish_input_finished",
        }
    }
}

/// # Errors that prevent a run from starting.
///
/// When `start` returns one of these the coordinator stays idle.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// Channels for the run could not be opened.
    #[error("failed to open channels for run `{run_id}`: {source}")]
    ChannelOpen {
        /// Run id that was being started.
        run_id: String,
        /// Underlying channel error.
        #[source]
        source: ChannelError,
    },

    /// The destination writer failed its connection check.
    #[error("writer `{writer}` failed connection validation")]
    WriterUnavailable {
        /// Writer name.
        writer: String,
    },

    /// Runs confirmed by writers need a writer factory in local modes.
    #[error("run mode {mode} with writer confirmation requires a writer")]
    MissingWriter {
        /// Configured run mode label.
        mode: &'static str,
    },

    /// A pipeline could not be built for an executor.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A writer could not be built.
    #[error(transparent)]
    Writer(#[from] WriteError),
}

impl CoordinatorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CoordinatorError::ChannelOpen { .. } => "coordinator_channel_open",
            CoordinatorError::WriterUnavailable { .. } => "coordinator_writer_unavailable",
            CoordinatorError::MissingWriter { .. } => "coordinator_missing_writer",
            CoordinatorError::Pipeline(_) => "coordinator_pipeline",
            CoordinatorError::Writer(_) => "coordinator_writer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_retryability() {
        let closed = ChannelError::Closed {
            role: ChannelRole::Events,
        };
        let backend = ChannelError::backend(ChannelRole::Destination, "broker down");
        let timeout = ChannelError::Timeout {
            role: ChannelRole::Source,
            timeout: Duration::from_secs(1),
        };

        assert!(!closed.is_retryable());
        assert!(backend.is_retryable());
        assert!(timeout.is_retryable());
        assert_eq!(
            backend.to_string(),
            "destination channel backend error: broker down"
        );
    }

    #[test]
    fn test_step_error_wraps_anyhow_transparently() {
        let err: StepError = anyhow::anyhow!("model not loaded").into();
        assert_eq!(err.as_label(), "step_other");
        assert_eq!(err.to_string(), "model not loaded");
    }

    #[test]
    fn test_panic_message_reads_string_payloads() {
        let borrowed = std::panic::catch_unwind(|| {
            panic!("boom");
        })
        .unwrap_err();
        let owned = std::panic::catch_unwind(|| {
            panic!("{} items", 3);
        })
        .unwrap_err();
        let other = std::panic::catch_unwind(|| {
            std::panic::panic_any(7u8);
        })
        .unwrap_err();

        assert_eq!(panic_message(borrowed.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "3 items");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    #[test]
    fn test_unknown_step_lists_available_types() {
        let err = PipelineError::UnknownStep {
            kind: "ocr".into(),
            available: vec!["copy_fields".into(), "drop_record".into()],
        };
        assert_eq!(
            err.to_string(),
            r#"unknown step type `ocr`; available: ["copy_fields", "drop_record"]"#
        );
    }
}
