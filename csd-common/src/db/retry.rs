//! Lock contention retry
//!
//! The webhook handler, the retry scheduler and manual retries all write to
//! the same SQLite file. A write that hits `SQLITE_BUSY` is tried again
//! instead of failing the submission.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::Error;

/// Default total wait budget for a contended write
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// Errors that can tell whether they are transient lock contention
pub trait LockContention {
    fn is_lock_contention(&self) -> bool;
}

impl LockContention for Error {
    fn is_lock_contention(&self) -> bool {
        Error::is_lock_contention(self)
    }
}

const INITIAL_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Run `operation` again while it fails with lock contention
///
/// Other errors return immediately. Contention is retried with a doubling
/// pause (10ms up to 1s) until `max_wait_ms` has passed since the first try,
/// after which the last contention error is returned.
pub async fn retry_on_lock<F, Fut, T, E>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: LockContention + std::fmt::Display,
{
    let started = Instant::now();
    let budget = Duration::from_millis(max_wait_ms);
    let mut pause = INITIAL_BACKOFF;
    let mut tries = 0u32;

    loop {
        tries += 1;
        let err = match operation().await {
            Ok(value) => {
                if tries > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        tries,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Store write went through after lock contention"
                    );
                }
                return Ok(value);
            }
            Err(err) if err.is_lock_contention() => err,
            Err(err) => return Err(err),
        };

        let waited = started.elapsed();
        if waited >= budget {
            tracing::error!(
                operation = operation_name,
                tries,
                waited_ms = waited.as_millis() as u64,
                max_wait_ms,
                error = %err,
                "Giving up on store write, database still locked"
            );
            return Err(err);
        }

        tracing::warn!(
            operation = operation_name,
            tries,
            pause_ms = pause.as_millis() as u64,
            "Database locked, pausing before next try"
        );
        tokio::time::sleep(pause).await;
        pause = (pause * 2).min(MAX_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_error() -> Error {
        Error::Database(sqlx::Error::Protocol("database is locked".to_string()))
    }

    #[tokio::test]
    async fn test_retry_succeeds_first_attempt() {
        let result = retry_on_lock("test_op", 5000, || async { Ok::<i32, Error>(42) }).await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_lock_errors() {
        let mut attempts = 0;

        let result = retry_on_lock("test_op", 5000, || {
            attempts += 1;
            let current = attempts;
            async move {
                if current < 3 {
                    Err(lock_error())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_wait() {
        let result = retry_on_lock("test_op", 30, || async { Err::<i32, Error>(lock_error()) }).await;

        assert!(result.unwrap_err().is_lock_contention());
    }

    #[tokio::test]
    async fn test_non_lock_error_fails_immediately() {
        let mut attempts = 0;

        let result = retry_on_lock("test_op", 5000, || {
            attempts += 1;
            async move { Err::<i32, Error>(Error::Internal("other error".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
