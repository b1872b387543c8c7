//! Retry helpers for database operations.

use rand::random;
use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::{Error, Result};

const SQLITE_BUSY_MAX_RETRIES: usize = 8;
const SQLITE_BUSY_BASE_DELAY_MS: u64 = 10;
const SQLITE_BUSY_MAX_DELAY_MS: u64 = 1000;

fn is_sqlite_busy_error(err: &Error) -> bool {
    let Error::DatabaseSqlx(sqlx_err) = err else {
        return false;
    };

    let sqlx::Error::Database(db_err) = sqlx_err else {
        let msg = sqlx_err.to_string().to_ascii_lowercase();
        return msg.contains("database is locked") || msg.contains("database is busy");
    };

    // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
    let code = db_err.code().map(Cow::into_owned);
    if matches!(code.as_deref(), Some("5") | Some("6")) {
        return true;
    }

    let msg = db_err.message().to_ascii_lowercase();
    msg.contains("database is locked") || msg.contains("database is busy")
}

/// Run `op`, retrying with jittered exponential backoff while SQLite reports busy.
pub async fn retry_on_sqlite_busy<T, F, Fut>(op_name: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_sqlite_busy_error(&err) || attempt >= SQLITE_BUSY_MAX_RETRIES {
                    return Err(err);
                }

                let exp_backoff_ms = SQLITE_BUSY_BASE_DELAY_MS.saturating_mul(1u64 << attempt);
                let capped_ms = exp_backoff_ms.min(SQLITE_BUSY_MAX_DELAY_MS);
                let jitter_ms = random::<u64>() % (capped_ms / 4 + 1);
                let delay =
                    Duration::from_millis((capped_ms + jitter_ms).min(SQLITE_BUSY_MAX_DELAY_MS));

                debug!(
                    "SQLite busy during {}, retrying in {:?} (attempt {}/{})",
                    op_name,
                    delay,
                    attempt + 1,
                    SQLITE_BUSY_MAX_RETRIES
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_non_busy_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = retry_on_sqlite_busy("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::validation("nope")) }
        })
        .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_busy_error_is_retried() {
        let calls = AtomicUsize::new(0);
        let result = retry_on_sqlite_busy("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::DatabaseSqlx(sqlx::Error::Protocol(
                        "database is locked".to_string(),
                    )))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
