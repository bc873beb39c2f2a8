//! # Record event subscribers.
//!
//! The completion tracker of each run forwards every event it consumes to a
//! [`SubscriberSet`], which fans it out to user-provided [`Subscribe`]
//! implementations.
//!
//! ## Architecture
//! ```text
//! events channel ──► tracker ──► SubscriberSet::emit(&Event)
//!                                      │
//!                                 ┌────┴────┬─────────┐
//!                                 ▼         ▼         ▼
//!                             LogWriter  Metrics   Custom ...
//! ```

#[cfg(feature = "logging")]
mod embedded;
mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
