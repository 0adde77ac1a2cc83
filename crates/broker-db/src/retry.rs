// SPDX-License-Identifier: MIT
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::DbError;

const MAX_ATTEMPTS: u32 = 3;
/// Backoff before attempt 2 and attempt 3, respectively. A 4 s step is kept
/// here for documentation parity with the externally specified backoff
/// curve even though three attempts never reach it.
const DELAYS: [Duration; 3] =
    [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

/// Retry `f` up to [`MAX_ATTEMPTS`] times, only for retryable [`DbError`]
/// kinds (network timeouts, 5xx). Never propagates an error: after
/// exhaustion the failure is logged and `None` is returned, so that DB
/// persistence failures never abort a session's in-memory progress.
pub async fn with_retry<T, F, Fut>(op: &str, f: F) -> Option<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        match f().await {
            Ok(v) => return Some(v),
            Err(err) => {
                let retryable = err.is_retryable();
                warn!(op, attempt, retryable, %err, "db call failed");
                last_err = Some(err);
                if !retryable {
                    break;
                }
                if attempt + 1 < MAX_ATTEMPTS {
                    tokio::time::sleep(DELAYS[attempt as usize]).await;
                }
            }
        }
    }
    let _ = last_err;
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_ok() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, DbError>(42)
        })
        .await;
        assert_eq!(result, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_on_retryable_error() {
        let calls = AtomicU32::new(0);
        let result: Option<()> = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DbError::NetworkTimeout("down".into()))
        })
        .await;
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_error() {
        let calls = AtomicU32::new(0);
        let result: Option<()> = with_retry("test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DbError::Unauthorized)
        })
        .await;
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
