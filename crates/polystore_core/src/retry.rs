//! Caller-level retry wrapper for idempotent operations.
//!
//! The pool evicts unhealthy connections on its own; this wrapper re-runs
//! the whole operation (including re-acquiring a connection) when it fails
//! with a retriable transport error.

use crate::config::RetryConfig;
use crate::error::{Result, StoreError};
use std::future::Future;

/// Executes operations under a [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run an idempotent operation, retrying transport failures with
    /// exponential backoff. Non-retriable errors surface immediately.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retriable() && attempt + 1 < self.config.attempts => {
                    let delay = self.config.delay_for(attempt);
                    log::debug!(
                        "retrying after transport failure (attempt {}/{}, waiting {delay:?}): {err}",
                        attempt + 1,
                        self.config.attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Run a future under a deadline, mapping expiry to [`StoreError::Cancelled`].
///
/// This is the context-level deadline mechanism: callers wrap any public
/// operation and the timeout propagates through pool acquisition and driver
/// I/O by dropping the in-flight future.
pub async fn with_deadline<T, Fut>(deadline: std::time::Duration, future: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_elapsed) => Err(StoreError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(2),
        })
    }

    #[tokio::test]
    async fn transport_errors_are_retried_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = fast_retry(3);

        let result = policy
            .run(|| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 1 {
                        Err(StoreError::transport("connection reset"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = fast_retry(2);

        let result: Result<()> = policy
            .run(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::transport("still down"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retriable_errors_surface_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = fast_retry(5);

        let result: Result<()> = policy
            .run(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(StoreError::NotFound)
                }
            })
            .await;

        assert!(matches!(result, Err(StoreError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_expiry_is_cancelled() {
        let result: Result<()> = with_deadline(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(StoreError::Cancelled)));
    }
}
