//! Execution controls for idempotent reads: per-attempt timeout and retry
//! with exponential backoff.
//!
//! Only status checks and artifact/image pulls go through here. Publish and
//! dispatch are never retried.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{PipelineError, ServiceError};
use crate::metrics::METRICS;

/// Retry configuration for idempotent reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum wall-clock time for a single attempt (milliseconds).
    pub attempt_timeout_ms: u64,
    /// Total attempts including the first (minimum 1).
    pub max_attempts: u32,
    /// Base delay for exponential backoff between attempts (milliseconds).
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 60_000,
            max_attempts: 3,
            backoff_base_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Same attempts and backoff with a different per-attempt limit.
    pub fn with_attempt_timeout_ms(&self, attempt_timeout_ms: u64) -> Self {
        Self {
            attempt_timeout_ms,
            ..self.clone()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(2u64.saturating_pow(attempt - 1)))
    }
}

/// A read that did not succeed within the policy.
#[derive(Debug)]
pub struct ReadFailure {
    pub operation: String,
    pub attempts: u32,
    pub last_error: ServiceError,
}

impl ReadFailure {
    pub fn is_not_found(&self) -> bool {
        matches!(self.last_error, ServiceError::NotFound(_))
    }
}

impl From<ReadFailure> for PipelineError {
    fn from(failure: ReadFailure) -> Self {
        PipelineError::FetchUnavailable {
            operation: failure.operation,
            attempts: failure.attempts,
            reason: failure.last_error.to_string(),
        }
    }
}

/// Run an idempotent read with per-attempt timeout and retry.
///
/// Retries only `ServiceError::Unavailable` (timeouts count as unavailable).
/// Any other error is returned immediately after the attempt that raised it.
pub async fn retry_read<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    op: F,
) -> std::result::Result<T, ReadFailure>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let timeout = Duration::from_millis(policy.attempt_timeout_ms);

    let mut attempt = 1;
    loop {
        let error = match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_elapsed) => ServiceError::Unavailable(format!(
                "attempt timed out after {}ms",
                policy.attempt_timeout_ms
            )),
        };

        if !error.is_retryable() || attempt == max_attempts {
            return Err(ReadFailure {
                operation: operation.to_string(),
                attempts: attempt,
                last_error: error,
            });
        }

        METRICS.inc_retries();
        warn!(operation, attempt, error = %error, "read failed, retrying");
        tokio::time::sleep(policy.backoff(attempt)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempt_timeout_ms: 1_000,
            max_attempts,
            backoff_base_ms: 5,
        }
    }

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_base_ms, 1_000);
    }

    #[test]
    fn test_attempt_timeout_override_keeps_budget() {
        let policy = fast(4).with_attempt_timeout_ms(90_000);
        assert_eq!(policy.attempt_timeout_ms, 90_000);
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.backoff_base_ms, 5);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = fast(5);
        assert_eq!(policy.backoff(1), Duration::from_millis(5));
        assert_eq!(policy.backoff(2), Duration::from_millis(10));
        assert_eq!(policy.backoff(3), Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let value = retry_read(&fast(3), "status", || async { Ok::<_, ServiceError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_retries_unavailable_then_succeeds() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let value = retry_read(&fast(3), "status", move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ServiceError::Unavailable("502".to_string()))
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, "done");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let failure = retry_read(&fast(2), "download", || async {
            Err::<(), _>(ServiceError::Unavailable("reset by peer".to_string()))
        })
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 2);
        let err: PipelineError = failure.into();
        assert!(matches!(err, PipelineError::FetchUnavailable { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let failure = retry_read(&fast(5), "pull", move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ServiceError::NotFound("image".to_string()))
            }
        })
        .await
        .unwrap_err();

        assert!(failure.is_not_found());
        assert_eq!(failure.attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_timeout_counts_as_unavailable() {
        let policy = RetryPolicy {
            attempt_timeout_ms: 20,
            max_attempts: 2,
            backoff_base_ms: 1,
        };
        let failure = retry_read(&policy, "status", || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ServiceError>(())
        })
        .await
        .unwrap_err();

        assert_eq!(failure.attempts, 2);
        assert!(matches!(failure.last_error, ServiceError::Unavailable(_)));
    }
}
