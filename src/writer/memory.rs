//! # In-memory upserting writer.
//!
//! Stores records in an insertion-ordered map keyed by record id. Clones share
//! the same store, so a test can keep one handle and give the coordinator a
//! factory built from another.
//!
//! Tombstones delete any stored copy of their id.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::WriteError;
use crate::record::Record;
use crate::writer::{WriteFailure, Writer, WriterFactory};

/// Upserting writer backed by a shared in-memory map.
#[derive(Clone, Debug, Default)]
pub struct MemoryWriter {
    store: Arc<RwLock<IndexMap<String, Record>>>,
}

impl MemoryWriter {
    /// Creates a writer with an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a factory handing out writers that share this store.
    pub fn factory(&self) -> WriterFactory {
        let writer = self.clone();
        Arc::new(move || Ok(Box::new(writer.clone()) as Box<dyn Writer>))
    }

    /// Stored copy of `id`.
    pub fn get(&self, id: &str) -> Option<Record> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Stored record ids in first-write order.
    pub fn ids(&self) -> Vec<String> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.store.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Writer for MemoryWriter {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write_batch(&self, records: &[Record]) -> Result<Vec<WriteFailure>, WriteError> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            if record.is_tombstone() {
                store.shift_remove(record.id());
            } else {
                store.insert(record.id().to_owned(), record.clone());
            }
        }
        Ok(Vec::new())
    }
}
