//! # Writer registry: type name → constructor.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::WriteError;
use crate::pipeline::StepConfig;
use crate::writer::{MemoryWriter, Writer, WriterFactory};

type Constructor = Arc<dyn Fn(&StepConfig) -> Result<Box<dyn Writer>, WriteError> + Send + Sync>;

/// Maps writer type names to constructors.
#[derive(Clone, Default)]
pub struct WriterRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl WriterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in `memory` writer.
    ///
    /// Each constructed `memory` writer has its own store.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("memory", |_: &StepConfig| {
            Ok(Box::new(MemoryWriter::new()) as Box<dyn Writer>)
        });
        registry
    }

    /// Registers (or replaces) the constructor for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, ctor: F) -> &mut Self
    where
        F: Fn(&StepConfig) -> Result<Box<dyn Writer>, WriteError> + Send + Sync + 'static,
    {
        self.constructors.insert(kind.into(), Arc::new(ctor));
        self
    }

    /// Registered type names, sorted.
    pub fn available(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    /// Returns a factory building `kind` writers from `config`.
    ///
    /// Unknown types fail here, before any run starts.
    pub fn factory(&self, kind: &str, config: StepConfig) -> Result<WriterFactory, WriteError> {
        let ctor = self
            .constructors
            .get(kind)
            .cloned()
            .ok_or_else(|| WriteError::UnknownWriter {
                kind: kind.to_owned(),
                available: self.available(),
            })?;
        Ok(Arc::new(move || ctor(&config)))
    }
}

impl std::fmt::Debug for WriterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterRegistry")
            .field("types", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_writer() {
        let registry = WriterRegistry::with_builtins();
        match registry.factory("solr", StepConfig::new()) {
            Err(WriteError::UnknownWriter { kind, available }) => {
                assert_eq!(kind, "solr");
                assert_eq!(available, vec!["memory".to_string()]);
            }
            _ => panic!("expected UnknownWriter"),
        }
    }

    #[test]
    fn test_builtin_memory_factory() {
        let registry = WriterRegistry::with_builtins();
        let factory = registry.factory("memory", StepConfig::new()).unwrap();
        assert_eq!(factory().unwrap().name(), "memory");
    }
}
