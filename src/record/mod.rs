//! # Unit-of-work model.
//!
//! - [`Record`] mutable record with identity, run association, typed fields and errors
//! - [`Value`] typed field value (string, int, float, bool, bytes, list, map)
//! - [`UpdateMode`] how a write treats an existing value

#[allow(clippy::module_inception)]
mod record;
mod value;

pub use record::{ERRORS_FIELD, ID_FIELD, RUN_ID_FIELD, Record, UpdateMode};
pub use value::Value;
