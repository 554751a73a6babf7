//! Job repository.
//!
//! All status transitions are single-row conditional updates. Writes that
//! move a job into a terminal state carry the predicate
//! `status NOT IN ('completed','failed','cancelled')` and report
//! `rows_affected`, so a racing terminal write loses cleanly and the caller
//! can suppress its side effects (quota recording, bus publishes).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::database::models::{JobDbModel, JobErrorInfo, JobProgress, JobStatus};
use crate::database::retry::busy_retry;
use crate::database::DbPool;
use crate::{Error, Result};

const TERMINAL_GUARD: &str = "status NOT IN ('completed', 'failed', 'cancelled')";

/// Default page size for owner listings.
pub const LIST_LIMIT: i64 = 50;

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get_job(&self, id: &str) -> Result<JobDbModel>;
    async fn create_job(&self, job: &JobDbModel) -> Result<()>;
    /// Jobs for one owner (None = anonymous), optional status filter,
    /// newest first, bounded to [`LIST_LIMIT`].
    async fn list_jobs_by_owner(
        &self,
        owner_id: Option<&str>,
        status: Option<JobStatus>,
    ) -> Result<Vec<JobDbModel>>;
    /// Idempotent progress write; forces `processing` and stamps
    /// `started_at` on first call. No-op (0 rows) once terminal.
    async fn update_progress(
        &self,
        id: &str,
        progress: &JobProgress,
        now: DateTime<Utc>,
    ) -> Result<u64>;
    /// Terminal transition to `completed`; sets output file, 100% progress
    /// and `completed_at` in one update. Returns rows updated.
    async fn mark_completed(
        &self,
        id: &str,
        output_file_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64>;
    /// Terminal transition to `failed` with the recorded error.
    async fn mark_failed(&self, id: &str, error: &JobErrorInfo, now: DateTime<Utc>) -> Result<u64>;
    /// Terminal transition to `cancelled`.
    async fn mark_cancelled(&self, id: &str, now: DateTime<Utc>) -> Result<u64>;
    /// Remove the row; referenced files are untouched.
    async fn delete_job(&self, id: &str) -> Result<u64>;
    /// Janitor sweep: drop rows older than the per-ownership cutoffs.
    async fn delete_jobs_older_than(
        &self,
        anonymous_cutoff: DateTime<Utc>,
        owned_cutoff: DateTime<Utc>,
    ) -> Result<u64>;
}

/// SQLx implementation of [`JobRepository`].
pub struct SqlxJobRepository {
    pool: DbPool,
}

impl SqlxJobRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn get_job(&self, id: &str) -> Result<JobDbModel> {
        sqlx::query_as::<_, JobDbModel>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Job", id))
    }

    async fn create_job(&self, job: &JobDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, owner_id, status, priority_class, input_file_ids, output_file_id,
                operations, output_format, output_file_name, progress, error,
                input_duration_seconds, conversion_minutes, use_hardware_accel,
                created_at, started_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.owner_id)
        .bind(&job.status)
        .bind(&job.priority_class)
        .bind(&job.input_file_ids)
        .bind(&job.output_file_id)
        .bind(&job.operations)
        .bind(&job.output_format)
        .bind(&job.output_file_name)
        .bind(&job.progress)
        .bind(&job.error)
        .bind(job.input_duration_seconds)
        .bind(job.conversion_minutes)
        .bind(job.use_hardware_accel)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_jobs_by_owner(
        &self,
        owner_id: Option<&str>,
        status: Option<JobStatus>,
    ) -> Result<Vec<JobDbModel>> {
        let mut sql = String::from("SELECT * FROM jobs WHERE ");
        sql.push_str(match owner_id {
            Some(_) => "owner_id = ?",
            None => "owner_id IS NULL",
        });
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, JobDbModel>(&sql);
        if let Some(owner) = owner_id {
            query = query.bind(owner.to_string());
        }
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        let jobs = query.bind(LIST_LIMIT).fetch_all(&self.pool).await?;
        Ok(jobs)
    }

    async fn update_progress(
        &self,
        id: &str,
        progress: &JobProgress,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let progress_json = serde_json::to_string(progress)?;
        busy_retry("update_progress", || async {
            let sql = format!(
                "UPDATE jobs SET progress = ?, status = 'processing', \
                 started_at = COALESCE(started_at, ?) WHERE id = ? AND {}",
                TERMINAL_GUARD
            );
            let res = sqlx::query(&sql)
                .bind(&progress_json)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(res.rows_affected())
        })
        .await
    }

    async fn mark_completed(
        &self,
        id: &str,
        output_file_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let progress_json = serde_json::to_string(&JobProgress::done())?;
        busy_retry("mark_completed", || async {
            let sql = format!(
                "UPDATE jobs SET status = 'completed', output_file_id = ?, progress = ?, \
                 completed_at = ? WHERE id = ? AND {}",
                TERMINAL_GUARD
            );
            let res = sqlx::query(&sql)
                .bind(output_file_id)
                .bind(&progress_json)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(res.rows_affected())
        })
        .await
    }

    async fn mark_failed(&self, id: &str, error: &JobErrorInfo, now: DateTime<Utc>) -> Result<u64> {
        let error_json = serde_json::to_string(error)?;
        busy_retry("mark_failed", || async {
            let sql = format!(
                "UPDATE jobs SET status = 'failed', error = ?, completed_at = ? \
                 WHERE id = ? AND {}",
                TERMINAL_GUARD
            );
            let res = sqlx::query(&sql)
                .bind(&error_json)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(res.rows_affected())
        })
        .await
    }

    async fn mark_cancelled(&self, id: &str, now: DateTime<Utc>) -> Result<u64> {
        busy_retry("mark_cancelled", || async {
            let sql = format!(
                "UPDATE jobs SET status = 'cancelled', completed_at = ? WHERE id = ? AND {}",
                TERMINAL_GUARD
            );
            let res = sqlx::query(&sql)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(res.rows_affected())
        })
        .await
    }

    async fn delete_job(&self, id: &str) -> Result<u64> {
        let res = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn delete_jobs_older_than(
        &self,
        anonymous_cutoff: DateTime<Utc>,
        owned_cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let res = sqlx::query(
            "DELETE FROM jobs WHERE (owner_id IS NULL AND created_at < ?) \
             OR (owner_id IS NOT NULL AND created_at < ?)",
        )
        .bind(anonymous_cutoff)
        .bind(owned_cutoff)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}
