//! Durable task row for the work queue.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Task lifecycle on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a worker (initial state, and after a retry requeue).
    Pending,
    /// Claimed by a worker holding a lease.
    Running,
    /// Handler returned success.
    Done,
    /// Retries exhausted.
    Dead,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Dead => "dead",
        }
    }
}

/// Task database model.
#[derive(Debug, Clone, FromRow)]
pub struct TaskDbModel {
    pub id: String,
    pub task_type: String,
    pub queue: String,
    /// JSON payload handed to the consumer.
    pub payload: String,
    pub status: String,
    /// Delivery attempts so far (incremented on claim).
    pub attempt: i64,
    pub max_retry: i64,
    pub timeout_secs: i64,
    /// Earliest time the task may be claimed (retry backoff).
    pub available_at: DateTime<Utc>,
    /// Lease deadline while running; expired leases are requeued.
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskDbModel {
    /// True once the task has used up its delivery attempts.
    pub fn retries_exhausted(&self) -> bool {
        self.attempt > self.max_retry
    }
}
