//! Job database model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::jobs::operations::Operation;
use crate::tier::PriorityClass;

/// Job status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job is persisted and waiting on the work queue.
    Queued,
    /// A worker has reported progress at least once.
    Processing,
    /// Job finished successfully; `output_file_id` is set.
    Completed,
    /// Job failed; `error` is set.
    Failed,
    /// Owner cancelled the job before it reached a terminal state.
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are sticky: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Job progress snapshot, stored as a JSON blob on the row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub percent: i32,
    #[serde(
        rename = "currentOperation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub current_operation: Option<String>,
    #[serde(rename = "eta", default)]
    pub eta_seconds: i64,
}

impl JobProgress {
    pub fn done() -> Self {
        Self {
            percent: 100,
            current_operation: None,
            eta_seconds: 0,
        }
    }
}

/// Error recorded on a failed job, stored as a JSON blob on the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobErrorInfo {
    pub code: String,
    pub message: String,
    /// Advisory metadata for UIs; the queue retry policy is independent.
    pub retryable: bool,
}

/// Job database model.
#[derive(Debug, Clone, FromRow)]
pub struct JobDbModel {
    pub id: String,
    /// NULL for anonymous-owned jobs.
    pub owner_id: Option<String>,
    pub status: String,
    pub priority_class: String,
    /// JSON array of input file ids.
    pub input_file_ids: String,
    pub output_file_id: Option<String>,
    /// JSON array of wire operations.
    pub operations: String,
    pub output_format: String,
    pub output_file_name: String,
    /// JSON blob, see [`JobProgress`].
    pub progress: String,
    /// JSON blob, see [`JobErrorInfo`]; NULL unless failed.
    pub error: Option<String>,
    pub input_duration_seconds: f64,
    pub conversion_minutes: i64,
    pub use_hardware_accel: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobDbModel {
    /// Create a new queued job row.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner_id: Option<String>,
        priority_class: PriorityClass,
        input_file_ids: &[String],
        operations: &[Operation],
        output_format: impl Into<String>,
        output_file_name: impl Into<String>,
        input_duration_seconds: f64,
        conversion_minutes: i64,
        use_hardware_accel: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id,
            status: JobStatus::Queued.as_str().to_string(),
            priority_class: priority_class.as_str().to_string(),
            input_file_ids: serde_json::to_string(input_file_ids)
                .unwrap_or_else(|_| "[]".to_string()),
            output_file_id: None,
            operations: serde_json::to_string(operations).unwrap_or_else(|_| "[]".to_string()),
            output_format: output_format.into(),
            output_file_name: output_file_name.into(),
            progress: serde_json::to_string(&JobProgress::default())
                .unwrap_or_else(|_| r#"{"percent":0}"#.to_string()),
            error: None,
            input_duration_seconds,
            conversion_minutes,
            use_hardware_accel,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn get_status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    pub fn is_terminal(&self) -> bool {
        self.get_status().map(|s| s.is_terminal()).unwrap_or(false)
    }

    pub fn get_input_file_ids(&self) -> Vec<String> {
        serde_json::from_str(&self.input_file_ids).unwrap_or_default()
    }

    pub fn get_operations(&self) -> Vec<Operation> {
        serde_json::from_str(&self.operations).unwrap_or_default()
    }

    pub fn get_progress(&self) -> JobProgress {
        serde_json::from_str(&self.progress).unwrap_or_default()
    }

    pub fn get_error(&self) -> Option<JobErrorInfo> {
        self.error
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub fn get_priority_class(&self) -> PriorityClass {
        PriorityClass::parse(&self.priority_class).unwrap_or(PriorityClass::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("pending"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_progress_json_shape() {
        let progress = JobProgress {
            percent: 42,
            current_operation: Some("convertFormat".to_string()),
            eta_seconds: 30,
        };
        let json = serde_json::to_value(&progress).unwrap();
        assert_eq!(json["percent"], 42);
        assert_eq!(json["currentOperation"], "convertFormat");
        assert_eq!(json["eta"], 30);

        let back: JobProgress = serde_json::from_value(json).unwrap();
        assert_eq!(back, progress);
    }

    #[test]
    fn test_new_job_defaults() {
        let job = JobDbModel::new(
            Some("tenant-1".to_string()),
            PriorityClass::Critical,
            &["file-1".to_string()],
            &[],
            "mp4",
            "clip_converted.mp4",
            70.0,
            2,
            false,
            Utc::now(),
        );
        assert_eq!(job.get_status(), Some(JobStatus::Queued));
        assert_eq!(job.get_progress().percent, 0);
        assert_eq!(job.get_input_file_ids(), vec!["file-1".to_string()]);
        assert!(job.get_error().is_none());
        assert!(!job.is_terminal());
    }
}
