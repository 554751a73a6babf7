//! Scheduled sweeps: expired artifacts, stale jobs, dormant tenants.
//!
//! All sweeps are idempotent and safe under at-least-once delivery of the
//! scheduled tasks that trigger them.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::repositories::{FileRepository, JobRepository, TenantRepository};
use crate::queue::{EnqueueOptions, Scheduler, TaskHandler};
use crate::storage::StorageService;
use crate::tier::PriorityClass;
use crate::Result;

pub const TASK_EXPIRE_FILES: &str = "files:expire";
pub const TASK_PRUNE_JOBS: &str = "jobs:prune";
pub const TASK_PRUNE_TENANTS: &str = "tenants:prune";

/// Anonymous-owned job rows are kept this long.
pub const ANONYMOUS_JOB_RETENTION_DAYS: i64 = 7;
/// Authenticated-owned job rows are kept this long.
pub const OWNED_JOB_RETENTION_DAYS: i64 = 30;
/// Anonymous tenant profiles are pruned after this much inactivity.
pub const DORMANT_TENANT_DAYS: i64 = 60;

/// Sweeper over files, jobs and tenant profiles.
pub struct Janitor {
    files: Arc<dyn FileRepository>,
    jobs: Arc<dyn JobRepository>,
    tenants: Arc<dyn TenantRepository>,
    storage: StorageService,
}

impl Janitor {
    pub fn new(
        files: Arc<dyn FileRepository>,
        jobs: Arc<dyn JobRepository>,
        tenants: Arc<dyn TenantRepository>,
        storage: StorageService,
    ) -> Self {
        Self {
            files,
            jobs,
            tenants,
            storage,
        }
    }

    /// Delete every file whose `expires_at` has passed: blob first, then
    /// the row. Per-row failures are logged and skipped; the sweep always
    /// visits every expired row.
    pub async fn expire_files(&self, now: DateTime<Utc>) -> Result<u64> {
        let expired = self.files.list_expired(now).await?;
        let mut deleted = 0u64;

        for file in expired {
            if let Err(err) = self.storage.delete(&file.storage_path).await {
                warn!(
                    file_id = %file.id,
                    path = %file.storage_path,
                    "Failed to delete expired blob: {}",
                    err
                );
            }
            match self.files.delete_file(&file.id).await {
                Ok(_) => deleted += 1,
                Err(err) => {
                    warn!(file_id = %file.id, "Failed to delete expired file row: {}", err);
                }
            }
        }

        if deleted > 0 {
            info!("Expired {} files", deleted);
        } else {
            debug!("No expired files");
        }
        Ok(deleted)
    }

    /// Delete job rows past retention: 7 days for anonymous owners, 30 for
    /// authenticated ones, regardless of status. Files are untouched.
    pub async fn prune_stale_jobs(&self, now: DateTime<Utc>) -> Result<u64> {
        let deleted = self
            .jobs
            .delete_jobs_older_than(
                now - Duration::days(ANONYMOUS_JOB_RETENTION_DAYS),
                now - Duration::days(OWNED_JOB_RETENTION_DAYS),
            )
            .await?;
        if deleted > 0 {
            info!("Pruned {} stale jobs", deleted);
        }
        Ok(deleted)
    }

    /// Delete anonymous tenant profiles inactive for 60+ days.
    pub async fn prune_dormant_tenants(&self, now: DateTime<Utc>) -> Result<u64> {
        let deleted = self
            .tenants
            .delete_dormant_anonymous(now - Duration::days(DORMANT_TENANT_DAYS))
            .await?;
        if deleted > 0 {
            info!("Pruned {} dormant tenant profiles", deleted);
        }
        Ok(deleted)
    }

    /// Register the periodic sweeps with the queue scheduler: hourly
    /// artifact expiry, daily job and tenant pruning, all on the low queue.
    pub fn register_schedules(&self, scheduler: &Scheduler) -> Result<()> {
        let opts = || {
            EnqueueOptions::on_queue(PriorityClass::Low)
                .with_max_retry(1)
                .with_timeout(StdDuration::from_secs(10 * 60))
        };
        scheduler.register("@hourly", TASK_EXPIRE_FILES, serde_json::json!({}), opts())?;
        scheduler.register("@daily", TASK_PRUNE_JOBS, serde_json::json!({}), opts())?;
        scheduler.register("@daily", TASK_PRUNE_TENANTS, serde_json::json!({}), opts())?;
        Ok(())
    }
}

/// Queue handler for the hourly artifact sweep.
pub struct ExpireFilesHandler(pub Arc<Janitor>);

#[async_trait]
impl TaskHandler for ExpireFilesHandler {
    fn task_type(&self) -> &'static str {
        TASK_EXPIRE_FILES
    }

    async fn handle(&self, _payload: serde_json::Value, _cancel: CancellationToken) -> Result<()> {
        self.0.expire_files(Utc::now()).await.map(|_| ())
    }
}

/// Queue handler for the daily stale-job sweep.
pub struct PruneJobsHandler(pub Arc<Janitor>);

#[async_trait]
impl TaskHandler for PruneJobsHandler {
    fn task_type(&self) -> &'static str {
        TASK_PRUNE_JOBS
    }

    async fn handle(&self, _payload: serde_json::Value, _cancel: CancellationToken) -> Result<()> {
        self.0.prune_stale_jobs(Utc::now()).await.map(|_| ())
    }
}

/// Queue handler for the daily dormant-tenant sweep.
pub struct PruneTenantsHandler(pub Arc<Janitor>);

#[async_trait]
impl TaskHandler for PruneTenantsHandler {
    fn task_type(&self) -> &'static str {
        TASK_PRUNE_TENANTS
    }

    async fn handle(&self, _payload: serde_json::Value, _cancel: CancellationToken) -> Result<()> {
        self.0.prune_dormant_tenants(Utc::now()).await.map(|_| ())
    }
}
