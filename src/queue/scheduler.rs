//! Periodic task scheduler.
//!
//! Registers cleanup-class tasks with cron-like expressions and enqueues
//! them on an interval. Sweeps are idempotent, so at-least-once delivery
//! of a scheduled task is safe.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{EnqueueOptions, SqliteWorkQueue, WorkQueue};
use crate::{Error, Result};

/// Parse a schedule expression into its period.
///
/// Recognized: `@hourly`, `@daily`, and `@every <secs>s` for tests.
pub fn parse_schedule(expr: &str) -> Result<Duration> {
    match expr {
        "@hourly" => Ok(Duration::from_secs(60 * 60)),
        "@daily" => Ok(Duration::from_secs(24 * 60 * 60)),
        other => {
            if let Some(rest) = other.strip_prefix("@every ") {
                let secs = rest
                    .strip_suffix('s')
                    .and_then(|n| n.parse::<u64>().ok())
                    .ok_or_else(|| {
                        Error::config(format!("invalid schedule expression '{}'", other))
                    })?;
                return Ok(Duration::from_secs(secs.max(1)));
            }
            Err(Error::config(format!(
                "invalid schedule expression '{}'",
                other
            )))
        }
    }
}

struct ScheduleEntry {
    period: Duration,
    task_type: &'static str,
    payload: serde_json::Value,
    opts: EnqueueOptions,
}

/// Interval-driven producer of periodic tasks.
pub struct Scheduler {
    queue: Arc<SqliteWorkQueue>,
    entries: parking_lot::Mutex<Vec<ScheduleEntry>>,
    cancel: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl Scheduler {
    pub fn new(queue: Arc<SqliteWorkQueue>) -> Self {
        Self {
            queue,
            entries: parking_lot::Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Register a periodic task.
    pub fn register(
        &self,
        expr: &str,
        task_type: &'static str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<()> {
        let period = parse_schedule(expr)?;
        self.entries.lock().push(ScheduleEntry {
            period,
            task_type,
            payload,
            opts,
        });
        Ok(())
    }

    /// Spawn one interval loop per registered entry. The first tick fires
    /// immediately, so sweeps also run at startup.
    pub fn start(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            return;
        };

        for entry in entries {
            let queue = self.queue.clone();
            let cancel = self.cancel.clone();
            info!(
                "Scheduled task {} every {:?} on queue {}",
                entry.task_type, entry.period, entry.opts.queue
            );
            join_set.spawn(async move {
                let mut ticker = tokio::time::interval(entry.period);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = queue
                                .enqueue(entry.task_type, entry.payload.clone(), entry.opts.clone())
                                .await
                            {
                                error!("Failed to enqueue scheduled task {}: {}", entry.task_type, e);
                            }
                        }
                    }
                }
            });
        }
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };
        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schedule() {
        assert_eq!(parse_schedule("@hourly").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_schedule("@daily").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_schedule("@every 5s").unwrap(), Duration::from_secs(5));
        assert!(parse_schedule("hourly").is_err());
        assert!(parse_schedule("@every 5m").is_err());
    }
}
