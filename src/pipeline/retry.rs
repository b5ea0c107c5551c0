//! Retry Executor (C4): classified-error retry with exponential backoff
//! (§4.4).
//!
//! The teacher's `pipeline/llm.rs::process_page` wraps one VLM call in a
//! fixed `2^attempt` backoff loop, warning on every retry and always
//! returning a result rather than propagating. This executor generalises
//! that shape to any operation: configurable backoff, classifier-driven
//! recoverable/fatal split (C12), and a cancellation-aware sleep so a
//! worker blocked mid-backoff can be woken up immediately by job
//! cancellation instead of sleeping out the full interval.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{ClassifiedError, ErrorKind};

/// Emitted between attempts; the caller turns this into a `warning`
/// progress event.
#[derive(Debug, Clone)]
pub struct RetryWarning {
    pub error: ClassifiedError,
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Run `operation` under the retry policy in `config`.
///
/// `classify` turns the operation's raw error into a `ClassifiedError`;
/// `on_warning` is invoked once per retried attempt (not on the final
/// failure). `cancel` lets an external event (fatal error elsewhere, client
/// disconnect) abort the wait between attempts immediately.
pub async fn retry_with_backoff<T, E, Op, Fut, Classify, OnWarning>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: Op,
    classify: Classify,
    mut on_warning: OnWarning,
) -> Result<T, ClassifiedError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Classify: Fn(&E) -> ClassifiedError,
    OnWarning: FnMut(RetryWarning),
{
    let mut backoff = config.base_delay;
    let mut last_error: Option<ClassifiedError> = None;

    for attempt in 1..=config.max_attempts {
        if cancel.is_cancelled() {
            return Err(ClassifiedError::new(ErrorKind::Cancelled, "operation cancelled before attempt"));
        }

        let attempt_result = timeout(config.per_attempt_timeout, operation()).await;

        let outcome = match attempt_result {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(raw_error)) => classify(&raw_error),
            Err(_elapsed) => ClassifiedError::new(ErrorKind::Timeout, "operation timed out"),
        };

        if !outcome.recoverable() || attempt == config.max_attempts {
            return Err(outcome);
        }

        on_warning(RetryWarning { error: outcome.clone(), attempt, max_attempts: config.max_attempts });
        last_error = Some(outcome);

        warn!(attempt, max_attempts = config.max_attempts, "retrying after recoverable error");

        tokio::select! {
            () = cancel.cancelled() => {
                return Err(ClassifiedError::new(ErrorKind::Cancelled, "operation cancelled during backoff"));
            }
            () = tokio::time::sleep(backoff) => {}
        }

        let next_backoff_secs = backoff.as_secs_f64() * config.backoff_multiplier;
        backoff = Duration::from_secs_f64(next_backoff_secs).min(config.max_backoff);
    }

    Err(last_error.unwrap_or_else(|| ClassifiedError::new(ErrorKind::Unknown, "retry loop exhausted with no recorded error")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn test_retry_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(10),
            per_attempt_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn succeeds_immediately_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let calls_clone = calls.clone();

        let result: Result<u32, ClassifiedError> = retry_with_backoff(
            &test_retry_config(),
            &cancel,
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, ClassifiedError>(42)
                }
            },
            |e: &ClassifiedError| e.clone(),
            |_w| {},
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_recoverable_errors_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let warnings = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let calls_clone = calls.clone();
        let warnings_clone = warnings.clone();

        let result: Result<u32, ClassifiedError> = retry_with_backoff(
            &test_retry_config(),
            &cancel,
            move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(ClassifiedError::new(ErrorKind::Network, "connection refused"))
                    } else {
                        Ok(99)
                    }
                }
            },
            |e: &ClassifiedError| e.clone(),
            move |_w| {
                warnings_clone.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(warnings.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_error_stops_immediately_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let calls_clone = calls.clone();

        let result: Result<u32, ClassifiedError> = retry_with_backoff(
            &test_retry_config(),
            &cancel,
            move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, ClassifiedError>(ClassifiedError::new(ErrorKind::LlmContract, "bad api key"))
                }
            },
            |e: &ClassifiedError| e.clone(),
            |_w| {},
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_before_next_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<u32, ClassifiedError> = retry_with_backoff(
            &test_retry_config(),
            &cancel,
            || async { Ok::<u32, ClassifiedError>(1) },
            |e: &ClassifiedError| e.clone(),
            |_w| {},
        )
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn exhausting_all_attempts_returns_last_error() {
        let cancel = CancellationToken::new();

        let result: Result<u32, ClassifiedError> = retry_with_backoff(
            &test_retry_config(),
            &cancel,
            || async { Err::<u32, ClassifiedError>(ClassifiedError::new(ErrorKind::Timeout, "slow")) },
            |e: &ClassifiedError| e.clone(),
            |_w| {},
        )
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Timeout);
    }
}
