//! # Destination writers.
//!
//! - [`Writer`]: the sink plugin contract (upsert by record id).
//! - [`Batch`]: size/age bounded accumulation.
//! - [`WriterRunner`]: drains the destination channel into a writer and
//!   confirms each record with a `FINISH` event.
//! - [`MemoryWriter`] / [`WriterRegistry`]: built-in sink and name lookup.

mod batch;
mod memory;
mod registry;
mod runner;
#[allow(clippy::module_inception)]
mod writer;

pub use batch::Batch;
pub use memory::MemoryWriter;
pub use registry::WriterRegistry;
pub use runner::WriterRunner;
pub use writer::{WriteFailure, Writer, WriterFactory};
