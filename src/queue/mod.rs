//! Priority-aware durable work queue.
//!
//! Tasks are persisted in the `tasks` table and handed to consumers by the
//! [`runtime::QueueRuntime`] with `critical:default:low` weighting.
//! Delivery is at-least-once: consumers must be idempotent at the
//! granularity of "produce the expected terminal state for this job id".

pub mod runtime;
pub mod scheduler;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::database::models::{TaskDbModel, TaskStatus};
use crate::database::repositories::{SqlxTaskRepository, TaskRepository};
use crate::database::DbPool;
use crate::tier::PriorityClass;
use crate::Result;

pub use runtime::{QueueRuntime, QueueRuntimeConfig, TaskHandler};
pub use scheduler::Scheduler;

/// Media-process task type.
pub const TASK_MEDIA_PROCESS: &str = "media:process";

/// Default retry budget for media tasks.
pub const DEFAULT_MAX_RETRY: u32 = 3;

/// Default per-task timeout (2h media process).
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Enqueue parameters.
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub queue: PriorityClass,
    pub max_retry: u32,
    pub timeout: Duration,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            queue: PriorityClass::Default,
            max_retry: DEFAULT_MAX_RETRY,
            timeout: DEFAULT_TASK_TIMEOUT,
        }
    }
}

impl EnqueueOptions {
    pub fn on_queue(queue: PriorityClass) -> Self {
        Self {
            queue,
            ..Self::default()
        }
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Producer-side contract: enqueue returns once the task is durably stored.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<String>;
}

/// SQLite-backed work queue shared by producers and the worker runtime.
pub struct SqliteWorkQueue {
    tasks: Arc<dyn TaskRepository>,
    notify: Arc<Notify>,
}

impl SqliteWorkQueue {
    pub fn new(pool: DbPool) -> Self {
        Self {
            tasks: Arc::new(SqlxTaskRepository::new(pool)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Wakes workers when new work lands.
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    pub(crate) fn tasks(&self) -> &Arc<dyn TaskRepository> {
        &self.tasks
    }
}

#[async_trait]
impl WorkQueue for SqliteWorkQueue {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<String> {
        let now = Utc::now();
        let task = TaskDbModel {
            id: uuid::Uuid::new_v4().to_string(),
            task_type: task_type.to_string(),
            queue: opts.queue.as_str().to_string(),
            payload: payload.to_string(),
            status: TaskStatus::Pending.as_str().to_string(),
            attempt: 0,
            max_retry: opts.max_retry as i64,
            timeout_secs: opts.timeout.as_secs() as i64,
            available_at: now,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        self.tasks.insert_task(&task).await?;
        self.notify.notify_waiters();

        tracing::debug!(
            task_id = %task.id,
            task_type,
            queue = %task.queue,
            "Task enqueued"
        );
        Ok(task.id)
    }
}
