//! # Step registry: type name → factory.
//!
//! Pipelines are described by [`StepSpec`](crate::StepSpec)s naming a step
//! *type*; the registry turns that name into a [`StepFactory`].
//!
//! ```rust
//! use pipevisor::StepRegistry;
//!
//! let registry = StepRegistry::with_builtins();
//! assert!(registry.available().contains(&"split_field".to_string()));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::pipeline::builtin::{CopyFields, DropRecord, SetStaticValues, SplitField};
use crate::pipeline::condition::Conditional;
use crate::pipeline::{Step, StepConfig, StepFactory, StepSpec};

/// Maps step type names to factories.
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: BTreeMap<String, Arc<dyn StepFactory>>,
}

impl StepRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in step types.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("set_static_values", SetStaticValues::from_config);
        registry.register("copy_fields", CopyFields::copy_from_config);
        registry.register("rename_fields", CopyFields::rename_from_config);
        registry.register("drop_record", DropRecord::from_config);
        registry.register("split_field", SplitField::from_config);
        registry
    }

    /// Registers (or replaces) the factory for `kind`.
    pub fn register<F: StepFactory>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    /// Returns `true` if a factory exists for `kind`.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered type names, sorted.
    pub fn available(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Builds one step from its spec, wrapped in its conditions if it has any.
    pub fn create(&self, spec: &StepSpec) -> Result<Box<dyn Step>, PipelineError> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| PipelineError::UnknownStep {
                kind: spec.kind.clone(),
                available: self.available(),
            })?;
        let step = factory
            .create(&spec.name, &spec.config)
            .map_err(|source| PipelineError::Init {
                name: spec.name.clone(),
                source,
            })?;
        if spec.conditions.is_empty() {
            return Ok(step);
        }
        Ok(Box::new(Conditional::new(
            step,
            spec.conditions.clone(),
            spec.condition_policy,
        )))
    }

    /// Builds a step directly from a type name and config.
    pub fn create_named(
        &self,
        kind: &str,
        name: &str,
        config: &StepConfig,
    ) -> Result<Box<dyn Step>, PipelineError> {
        self.create(&StepSpec::new(name, kind).with_config(config.clone()))
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("types", &self.available())
            .finish()
    }
}
