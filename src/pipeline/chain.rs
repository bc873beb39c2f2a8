//! # Ordered step chain and its declarative description.
//!
//! A [`Pipeline`] is the per-executor instance: its steps are created and
//! initialized once, then reused for every record the executor pulls.
//! A [`PipelineSpec`] is the shareable description; [`PipelineSpec::factory`]
//! turns it into a [`PipelineFactory`] the coordinator calls once per executor.
//!
//! ```text
//! PipelineSpec { steps: [StepSpec, ...] }
//!        │ factory(registry)
//!        ▼
//! PipelineFactory ──► Pipeline (executor 1)
//!                 ──► Pipeline (executor 2)
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::PipelineError;
use crate::pipeline::{Condition, ConditionPolicy, Step, StepConfig, StepRegistry};

/// Declarative description of one step.
#[derive(Clone, Debug, Deserialize)]
pub struct StepSpec {
    /// Unique name within the pipeline.
    pub name: String,
    /// Registered step type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific configuration.
    #[serde(default)]
    pub config: StepConfig,
    /// Records the step applies to; others pass through unchanged.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_policy: ConditionPolicy,
}

impl StepSpec {
    /// Creates a spec with an empty config.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            config: StepConfig::new(),
            conditions: Vec::new(),
            condition_policy: ConditionPolicy::default(),
        }
    }

    /// Replaces the config.
    pub fn with_config(mut self, config: StepConfig) -> Self {
        self.config = config;
        self
    }

    /// Limits the step to records matching `conditions` under `policy`.
    pub fn with_conditions(mut self, conditions: Vec<Condition>, policy: ConditionPolicy) -> Self {
        self.conditions = conditions;
        self.condition_policy = policy;
        self
    }
}

/// Declarative description of a pipeline.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline name for logs.
    #[serde(default)]
    pub name: String,
    /// Steps in execution order.
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl PipelineSpec {
    /// Returns a factory that builds this pipeline from `registry`.
    pub fn factory(self, registry: Arc<StepRegistry>) -> PipelineFactory {
        Arc::new(move || Pipeline::from_specs(&self.name, &self.steps, &registry))
    }
}

/// Builds a fresh pipeline for each executor.
pub type PipelineFactory = Arc<dyn Fn() -> Result<Pipeline, PipelineError> + Send + Sync>;

/// Ordered steps owned by one executor.
pub struct Pipeline {
    name: String,
    steps: Vec<Box<dyn Step>>,
}

impl Pipeline {
    /// Assembles a pipeline, rejecting duplicate step names.
    pub fn new(name: impl Into<String>, steps: Vec<Box<dyn Step>>) -> Result<Self, PipelineError> {
        let mut seen = HashSet::new();
        for step in &steps {
            if !seen.insert(step.name().to_owned()) {
                return Err(PipelineError::DuplicateStep {
                    name: step.name().to_owned(),
                });
            }
        }
        Ok(Self {
            name: name.into(),
            steps,
        })
    }

    /// A pipeline without steps; records pass straight through.
    pub fn empty() -> Self {
        Self {
            name: String::new(),
            steps: Vec::new(),
        }
    }

    /// Creates every step of `specs` through `registry`.
    pub fn from_specs(
        name: &str,
        specs: &[StepSpec],
        registry: &StepRegistry,
    ) -> Result<Self, PipelineError> {
        let steps = specs
            .iter()
            .map(|spec| registry.create(spec))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(name, steps)
    }

    /// Pipeline name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if the pipeline has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step at position `idx`.
    pub fn step(&self, idx: usize) -> Option<&dyn Step> {
        self.steps.get(idx).map(|s| s.as_ref())
    }

    /// Names of all steps in order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Runs `Step::init` on every step in order; stops at the first error.
    pub async fn init(&mut self) -> Result<(), PipelineError> {
        for step in &mut self.steps {
            step.init().await.map_err(|source| PipelineError::Init {
                name: step.name().to_owned(),
                source,
            })?;
            debug!(pipeline = %self.name, step = step.name(), "step initialized");
        }
        Ok(())
    }

    /// Closes every step in order.
    pub async fn close(&self) {
        for step in &self.steps {
            step.close().await;
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::empty()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_duplicate_step_names_rejected() {
        let registry = StepRegistry::with_builtins();
        let specs = vec![
            StepSpec::new("drop", "drop_record"),
            StepSpec::new("drop", "drop_record"),
        ];
        let err = Pipeline::from_specs("p", &specs, &registry).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateStep { ref name } if name == "drop"));
    }

    #[test]
    fn test_spec_deserializes_type_field() {
        let spec: PipelineSpec = serde_json::from_value(json!({
            "name": "ingest",
            "steps": [
                {"name": "tag", "type": "set_static_values", "config": {"values": {"src": "a"}}},
                {"name": "split", "type": "split_field", "config": {"field": "f", "target": "t"}}
            ]
        }))
        .unwrap();

        let factory = spec.factory(Arc::new(StepRegistry::with_builtins()));
        let pipeline = factory().unwrap();
        assert_eq!(pipeline.step_names(), vec!["tag", "split"]);
        assert_eq!(pipeline.name(), "ingest");
    }

    #[tokio::test]
    async fn test_empty_pipeline_inits() {
        let mut pipeline = Pipeline::empty();
        pipeline.init().await.unwrap();
        assert!(pipeline.is_empty());
    }
}
