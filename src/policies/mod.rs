//! Retry policies for channel publishes.
//!
//! ## Contents
//! - [`RetryPolicy`]   how many attempts a publish gets
//! - [`BackoffPolicy`] how the delay between attempts grows (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization so executors do not retry in lockstep
//!
//! ## Quick wiring
//! ```text
//! Config { retry: RetryPolicy }
//!      └─► Executor / WriterRunner / Publisher
//!           └─ retry.run("destination", || channel.publish(record.clone()))
//!                 └─ backoff.delay_for(attempt) between transient failures
//! ```

mod backoff;
mod jitter;
mod retry;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use retry::RetryPolicy;
