//! Write retries for SQLite lock contention.
//!
//! Under WAL there is one writer at a time; a second writer gets
//! SQLITE_BUSY or SQLITE_LOCKED instead of blocking forever. Contended
//! writes run through [`WriteRetry`], which backs off with full jitter so
//! competing writers spread out instead of stampeding in lockstep.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::{Error, Result};

/// Retry policy for writes that can lose the SQLite write lock.
#[derive(Debug, Clone, Copy)]
pub struct WriteRetry {
    /// Total attempts, including the first.
    attempts: u32,
    /// Smallest pause between attempts.
    floor: Duration,
    /// Largest pause between attempts.
    cap: Duration,
}

impl Default for WriteRetry {
    fn default() -> Self {
        Self {
            attempts: 8,
            floor: Duration::from_millis(5),
            cap: Duration::from_secs(1),
        }
    }
}

impl WriteRetry {
    /// Run `op`, retrying while SQLite reports the database locked.
    ///
    /// Full jitter: each pause is drawn uniformly from `floor..=ceiling`,
    /// and the ceiling doubles per attempt up to `cap`. Non-contention
    /// errors propagate immediately.
    pub async fn run<T, F, Fut>(self, op_name: &'static str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        let mut ceiling = self.floor;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.attempts && is_lock_contention(&err) => {
                    let pause = rand::rng().random_range(self.floor..=ceiling);
                    debug!(
                        op = op_name,
                        attempt,
                        pause_ms = pause.as_millis() as u64,
                        "SQLite write lock contended, backing off"
                    );
                    tokio::time::sleep(pause).await;
                    ceiling = ceiling.saturating_mul(2).min(self.cap);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Retry a contended write with the default policy.
pub async fn busy_retry<T, F, Fut>(op_name: &'static str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    WriteRetry::default().run(op_name, op).await
}

/// SQLITE_BUSY (5) and SQLITE_LOCKED (6), including their extended result
/// codes (BUSY_RECOVERY 261, BUSY_SNAPSHOT 517, BUSY_TIMEOUT 773,
/// LOCKED_SHAREDCACHE 262). Driver-level errors carry no code, only a
/// message.
const CONTENTION_CODES: [&str; 6] = ["5", "6", "261", "262", "517", "773"];

fn is_lock_contention(err: &Error) -> bool {
    let Error::Database(source) = err else {
        return false;
    };
    match source {
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| CONTENTION_CODES.contains(&code.as_ref()))
            .unwrap_or(false),
        other => {
            let msg = other.to_string();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn locked_error() -> Error {
        Error::Database(sqlx::Error::Protocol("database is locked".to_string()))
    }

    #[test]
    fn test_classification() {
        assert!(is_lock_contention(&locked_error()));
        assert!(!is_lock_contention(&Error::Database(sqlx::Error::RowNotFound)));
        assert!(!is_lock_contention(&Error::validation("bad shape")));
    }

    #[tokio::test]
    async fn test_retries_through_contention() {
        let calls = AtomicUsize::new(0);
        let result: Result<&str> = busy_retry("test_op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(locked_error())
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = busy_retry("test_op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::validation("nope")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempt_budget() {
        let policy = WriteRetry {
            attempts: 3,
            floor: Duration::from_millis(1),
            cap: Duration::from_millis(4),
        };
        let calls = AtomicUsize::new(0);
        let result: Result<()> = policy
            .run("test_op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(locked_error()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
