//! Task queue repository.
//!
//! Backs the durable work queue. Claiming uses a select-then-conditional
//! UPDATE so concurrent workers never double-claim, and running tasks carry
//! a lease so a crashed worker's tasks get redelivered (at-least-once).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::database::models::TaskDbModel;
use crate::database::retry::busy_retry;
use crate::database::DbPool;
use crate::Result;

/// Extra slack on top of the task timeout before a lease counts as lost.
const LEASE_GRACE_SECS: i64 = 30;

/// Task repository trait.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert_task(&self, task: &TaskDbModel) -> Result<()>;
    async fn get_task(&self, id: &str) -> Result<Option<TaskDbModel>>;
    /// Atomically claim the oldest available task on `queue`, stamping the
    /// attempt counter and lease. Returns None when the queue is empty.
    async fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<TaskDbModel>>;
    async fn mark_done(&self, id: &str, now: DateTime<Utc>) -> Result<()>;
    /// Put a failed task back on its queue, delayed until `available_at`.
    async fn requeue_for_retry(
        &self,
        id: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn mark_dead(&self, id: &str, now: DateTime<Utc>) -> Result<()>;
    /// Redeliver tasks whose worker died: expired leases go back to
    /// pending (or dead once attempts are exhausted). Returns requeued count.
    async fn requeue_expired_leases(&self, now: DateTime<Utc>) -> Result<u64>;
    async fn count_pending(&self, queue: &str) -> Result<u64>;
}

/// SQLx implementation of [`TaskRepository`].
pub struct SqlxTaskRepository {
    pool: DbPool,
}

impl SqlxTaskRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqlxTaskRepository {
    async fn insert_task(&self, task: &TaskDbModel) -> Result<()> {
        busy_retry("insert_task", || async {
            sqlx::query(
                r#"
                INSERT INTO tasks (
                    id, task_type, queue, payload, status, attempt, max_retry,
                    timeout_secs, available_at, lease_expires_at, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&task.id)
            .bind(&task.task_type)
            .bind(&task.queue)
            .bind(&task.payload)
            .bind(&task.status)
            .bind(task.attempt)
            .bind(task.max_retry)
            .bind(task.timeout_secs)
            .bind(task.available_at)
            .bind(task.lease_expires_at)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get_task(&self, id: &str) -> Result<Option<TaskDbModel>> {
        let task = sqlx::query_as::<_, TaskDbModel>("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn claim_next(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<TaskDbModel>> {
        busy_retry("claim_next_task", || async {
            // Select first, then claim with a conditional UPDATE; a lost race
            // just moves on to the next candidate.
            for _ in 0..3 {
                let candidate = sqlx::query_as::<_, TaskDbModel>(
                    "SELECT * FROM tasks WHERE status = 'pending' AND queue = ? \
                     AND available_at <= ? ORDER BY created_at LIMIT 1",
                )
                .bind(queue)
                .bind(now)
                .fetch_optional(&self.pool)
                .await?;

                let Some(task) = candidate else {
                    return Ok(None);
                };

                let lease = now + Duration::seconds(task.timeout_secs + LEASE_GRACE_SECS);
                let res = sqlx::query(
                    "UPDATE tasks SET status = 'running', attempt = attempt + 1, \
                     lease_expires_at = ?, updated_at = ? WHERE id = ? AND status = 'pending'",
                )
                .bind(lease)
                .bind(now)
                .bind(&task.id)
                .execute(&self.pool)
                .await?;

                if res.rows_affected() == 1 {
                    let claimed = sqlx::query_as::<_, TaskDbModel>(
                        "SELECT * FROM tasks WHERE id = ?",
                    )
                    .bind(&task.id)
                    .fetch_one(&self.pool)
                    .await?;
                    return Ok(Some(claimed));
                }
            }
            Ok(None)
        })
        .await
    }

    async fn mark_done(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        busy_retry("task_mark_done", || async {
            sqlx::query(
                "UPDATE tasks SET status = 'done', lease_expires_at = NULL, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn requeue_for_retry(
        &self,
        id: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        busy_retry("task_requeue", || async {
            sqlx::query(
                "UPDATE tasks SET status = 'pending', lease_expires_at = NULL, \
                 available_at = ?, updated_at = ? WHERE id = ?",
            )
            .bind(available_at)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn mark_dead(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        busy_retry("task_mark_dead", || async {
            sqlx::query(
                "UPDATE tasks SET status = 'dead', lease_expires_at = NULL, updated_at = ? \
                 WHERE id = ?",
            )
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn requeue_expired_leases(&self, now: DateTime<Utc>) -> Result<u64> {
        busy_retry("requeue_expired_leases", || async {
            // Exhausted tasks go straight to dead instead of cycling forever.
            sqlx::query(
                "UPDATE tasks SET status = 'dead', lease_expires_at = NULL, updated_at = ? \
                 WHERE status = 'running' AND lease_expires_at < ? AND attempt > max_retry",
            )
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

            let res = sqlx::query(
                "UPDATE tasks SET status = 'pending', lease_expires_at = NULL, \
                 available_at = ?, updated_at = ? WHERE status = 'running' AND lease_expires_at < ?",
            )
            .bind(now)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(res.rows_affected())
        })
        .await
    }

    async fn count_pending(&self, queue: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tasks WHERE status = 'pending' AND queue = ?")
                .bind(queue)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }
}
