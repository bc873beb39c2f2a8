//! # Built-in subscribers
//!
//! - [`LogWriter`]: logs record events through `tracing`.

mod log;

pub use log::LogWriter;
