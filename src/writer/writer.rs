use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WriteError;
use crate::record::Record;

/// A record the destination refused within an otherwise successful batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteFailure {
    /// Id of the rejected record.
    pub id: String,
    /// Why it was rejected.
    pub reason: String,
}

impl WriteFailure {
    /// Creates a failure entry.
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// # Destination sink for processed records.
///
/// Writers are driven by a [`WriterRunner`](crate::WriterRunner), which calls
/// [`write_batch`](Writer::write_batch) with up to `batch_size` records.
///
/// ## Contract
/// - Writes **upsert by record id**: a record delivered twice overwrites
///   itself. The core never redelivers, but distributed backends may.
/// - Tombstones (records carrying errors and no fields) arrive like any
///   other record; a writer may store, skip or delete them.
/// - `Ok(failures)` lists the records that were not written; every other
///   record in the batch is considered written.
/// - `Err(_)` means nothing in the batch can be assumed written.
#[async_trait]
pub trait Writer: Send + Sync + 'static {
    /// Writer name for logs.
    fn name(&self) -> &str;

    /// Checks that the destination is reachable before a run starts.
    async fn validate_connection(&self) -> bool {
        true
    }

    /// Writes one batch.
    async fn write_batch(&self, records: &[Record]) -> Result<Vec<WriteFailure>, WriteError>;

    /// Releases resources when the runner stops.
    async fn close(&self) -> Result<(), WriteError> {
        Ok(())
    }
}

/// Builds a fresh writer for each writer task.
pub type WriterFactory = Arc<dyn Fn() -> Result<Box<dyn Writer>, WriteError> + Send + Sync>;
