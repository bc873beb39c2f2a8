//! # Bounded retry for channel operations.
//!
//! [`RetryPolicy::run`] re-invokes an operation while it fails with a
//! retryable [`ChannelError`] and attempts remain, sleeping per
//! [`BackoffPolicy`] in between. Non-retryable errors return immediately.

use std::future::Future;

use serde::Deserialize;
use tokio::time;
use tracing::warn;

use crate::error::ChannelError;
use crate::policies::BackoffPolicy;

/// How many times a publish is attempted and how long to wait in between.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one (min 1).
    pub attempts: u32,
    /// Delay between attempts.
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    /// Five attempts with the default backoff.
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn never() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `what` names the operation in retry logs.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ChannelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChannelError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.backoff.delay_for(attempt);
                    warn!(
                        op = what,
                        attempt = attempt + 1,
                        ?delay,
                        error = %err,
                        "retrying channel operation"
                    );
                    time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::channel::ChannelRole;
    use crate::policies::JitterPolicy;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            backoff: BackoffPolicy {
                first: Duration::from_millis(1),
                max: Duration::from_millis(1),
                factor: 1.0,
                jitter: JitterPolicy::None,
            },
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let out = fast(5)
            .run("publish", || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ChannelError::backend(ChannelRole::Destination, "busy"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let out: Result<(), _> = fast(3)
            .run("publish", || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ChannelError::backend(ChannelRole::Events, "down"))
                }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_closed_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let out: Result<(), _> = fast(5)
            .run("publish", || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ChannelError::Closed {
                        role: ChannelRole::Source,
                    })
                }
            })
            .await;
        assert!(matches!(out, Err(ChannelError::Closed { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
