//! Backoff strategy implementations
//!
//! Exponential backoff with jitter for blocking filesystem calls. The engine
//! is synchronous end to end, so retries sleep the calling thread.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::classifier::RetryClassifiable;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (3 means up to 4 calls).
    pub max_attempts: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// No sleeping between attempts. Intended for tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

/// Execute operation with exponential backoff retry (synchronous)
///
/// - Only errors classified `Retryable` are retried
/// - `suggested_backoff()` overrides the computed delay when present
/// - Returns `MaxAttemptsExceeded` once retries are exhausted
/// - Returns `PermanentError` for non-retryable errors
pub fn execute_with_backoff_sync<F, T, E>(
    mut operation: F,
    config: &RetryConfig,
) -> super::Result<T>
where
    F: FnMut() -> Result<T, E>,
    E: std::error::Error + RetryClassifiable,
{
    let mut attempts = 0;
    let mut backoff_ms = config.initial_backoff_ms;

    loop {
        attempts += 1;

        match operation() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() {
                    return Err(super::RetryError::PermanentError(err.to_string()));
                }

                // max_attempts=3 means 1 initial + 3 retries = 4 total calls
                if attempts > config.max_attempts {
                    return Err(super::RetryError::MaxAttemptsExceeded {
                        attempts,
                        last_error: err.to_string(),
                    });
                }

                let sleep = err.suggested_backoff().unwrap_or_else(|| {
                    let base = Duration::from_millis(backoff_ms.min(config.max_backoff_ms));
                    apply_jitter(base, config.jitter_factor)
                });
                tracing::debug!(
                    attempt = attempts,
                    sleep_ms = sleep.as_millis() as u64,
                    "Transient error: {err}, retrying"
                );
                if !sleep.is_zero() {
                    std::thread::sleep(sleep);
                }

                backoff_ms = (backoff_ms as f64 * config.backoff_multiplier) as u64;
            }
        }
    }
}

/// Apply jitter to a duration
///
/// Adds random variation (±jitter_factor) to prevent thundering herd.
/// Example: 100ms with 0.5 jitter → 50ms to 150ms
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }
    let jitter = rand::rng().random_range(-jitter_factor..=jitter_factor);
    let jittered_ms = (duration.as_millis() as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(jittered_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryError;
    use crate::retry::classifier::{ErrorClass, PermanentError, RetryableError};
    use std::cell::Cell;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("Transient error: {0}")]
        Transient(String),
        #[error("Permanent error: {0}")]
        Permanent(String),
    }

    impl RetryClassifiable for TestError {
        fn classify(&self) -> ErrorClass {
            match self {
                TestError::Transient(_) => ErrorClass::Retryable(RetryableError::FileLocked),
                TestError::Permanent(msg) => ErrorClass::Permanent(PermanentError::InvalidInput {
                    field: "test".to_string(),
                    reason: msg.clone(),
                }),
            }
        }

        fn suggested_backoff(&self) -> Option<Duration> {
            None
        }
    }

    #[test]
    fn test_immediate_success() {
        let calls = Cell::new(0);
        let result = execute_with_backoff_sync(
            || {
                calls.set(calls.get() + 1);
                Ok::<_, TestError>(42)
            },
            &RetryConfig::immediate(3),
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let calls = Cell::new(0);
        let result = execute_with_backoff_sync(
            || {
                calls.set(calls.get() + 1);
                Err::<i32, _>(TestError::Permanent("bad".to_string()))
            },
            &RetryConfig::immediate(3),
        );
        assert!(matches!(result, Err(RetryError::PermanentError(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_transient_then_success() {
        let calls = Cell::new(0);
        let result = execute_with_backoff_sync(
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err(TestError::Transient("locked".to_string()))
                } else {
                    Ok("done")
                }
            },
            &RetryConfig::immediate(3),
        );
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_exhausted_retries() {
        let calls = Cell::new(0);
        let result = execute_with_backoff_sync(
            || {
                calls.set(calls.get() + 1);
                Err::<(), _>(TestError::Transient("still locked".to_string()))
            },
            &RetryConfig::immediate(2),
        );
        let err = result.unwrap_err();
        assert!(err.is_exhausted());
        assert!(err.to_string().contains("still locked"));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let jittered = apply_jitter(base, 0.5);
            assert!(jittered >= Duration::from_millis(50));
            assert!(jittered <= Duration::from_millis(150));
        }
        assert_eq!(apply_jitter(base, 0.0), base);
    }
}
