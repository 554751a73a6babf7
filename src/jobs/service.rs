//! Job service: admission, lifecycle transitions and read queries.
//!
//! The job row is the single source of truth. Every terminal transition is
//! a conditional single-row update; bus events are published only when the
//! update actually changed the row, so a lost race (e.g. cancel vs
//! complete) publishes nothing.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::database::models::{
    is_anonymous_tenant, JobDbModel, JobErrorInfo, JobProgress, JobStatus,
};
use crate::database::repositories::{FileRepository, JobRepository};
use crate::jobs::executor::MediaProcessPayload;
use crate::jobs::operations::{contains_merge, Operation};
use crate::progress::{JobEvent, ProgressBus};
use crate::queue::{EnqueueOptions, WorkQueue, TASK_MEDIA_PROCESS};
use crate::quota::{conversion_minutes, QuotaLedger};
use crate::storage::{StorageService, Zone};
use crate::{Error, Result};

/// Parameters for creating a job.
#[derive(Debug, Clone)]
pub struct CreateJobParams {
    /// Resolved tenant identity (authenticated id or per-device anon id).
    pub tenant_id: String,
    /// At least one input file id; more than one means merge.
    pub input_file_ids: Vec<String>,
    pub operations: Vec<Operation>,
    pub output_format: String,
    /// Derived from the first input when empty.
    pub output_file_name: Option<String>,
    /// From the client-side probe; drives conversion-minute accounting.
    pub input_duration_seconds: f64,
}

/// Job orchestration service.
pub struct JobService {
    jobs: Arc<dyn JobRepository>,
    files: Arc<dyn FileRepository>,
    quota: QuotaLedger,
    queue: Arc<dyn WorkQueue>,
    bus: Arc<ProgressBus>,
    storage: StorageService,
}

impl JobService {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        files: Arc<dyn FileRepository>,
        quota: QuotaLedger,
        queue: Arc<dyn WorkQueue>,
        bus: Arc<ProgressBus>,
        storage: StorageService,
    ) -> Self {
        Self {
            jobs,
            files,
            quota,
            queue,
            bus,
            storage,
        }
    }

    pub fn quota(&self) -> &QuotaLedger {
        &self.quota
    }

    pub fn storage(&self) -> &StorageService {
        &self.storage
    }

    /// Admit and enqueue a new job.
    pub async fn create(&self, params: CreateJobParams) -> Result<JobDbModel> {
        if params.input_file_ids.is_empty() {
            return Err(Error::validation("at least one input file is required"));
        }
        if params.output_format.is_empty() {
            return Err(Error::validation("output format is required"));
        }

        let minutes = conversion_minutes(params.input_duration_seconds);
        self.quota
            .check_minutes(&params.tenant_id, minutes)
            .await?;

        // Resolve input file ids to storage paths, enforcing the tier's
        // size cap on each.
        let mut input_paths = Vec::with_capacity(params.input_file_ids.len());
        let mut first_name = String::new();
        for (i, file_id) in params.input_file_ids.iter().enumerate() {
            let file = self.files.get_file(file_id).await.map_err(|err| match err {
                Error::NotFound { .. } => Error::FileNotFound(file_id.clone()),
                other => other,
            })?;
            self.quota
                .check_file_size(&params.tenant_id, file.size_bytes)
                .await?;
            if i == 0 {
                first_name = file.original_name.clone();
            }
            input_paths.push(file.storage_path);
        }

        let operations = self.resolve_operation_refs(params.operations).await?;

        let is_merge = params.input_file_ids.len() > 1 || contains_merge(&operations);
        let output_file_name = match params.output_file_name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => {
                let base = Path::new(&first_name)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "output".to_string());
                let suffix = if is_merge { "merged" } else { "converted" };
                format!("{}_{}.{}", base, suffix, params.output_format)
            }
        };

        let limits = self.quota.limits(&params.tenant_id).await?;
        let owner_id = if is_anonymous_tenant(&params.tenant_id) {
            None
        } else {
            Some(params.tenant_id.clone())
        };

        let job = JobDbModel::new(
            owner_id,
            limits.priority,
            &params.input_file_ids,
            &operations,
            &params.output_format,
            &output_file_name,
            params.input_duration_seconds,
            minutes,
            limits.use_hardware_accel,
            Utc::now(),
        );
        self.jobs.create_job(&job).await?;

        let output_path = self
            .storage
            .path_for(Zone::Output, &format!("{}.{}", job.id, params.output_format));

        let payload = MediaProcessPayload {
            job_id: job.id.clone(),
            input_path: input_paths[0].clone(),
            input_paths: if is_merge {
                Some(input_paths.clone())
            } else {
                None
            },
            output_path,
            operations,
            use_gpu: limits.use_hardware_accel,
        };

        let enqueue_result = self
            .queue
            .enqueue(
                TASK_MEDIA_PROCESS,
                serde_json::to_value(&payload)?,
                EnqueueOptions::on_queue(limits.priority),
            )
            .await;

        if let Err(err) = enqueue_result {
            let info = JobErrorInfo {
                code: "ENQUEUE_FAILED".to_string(),
                message: err.to_string(),
                retryable: true,
            };
            if let Err(mark_err) = self.jobs.mark_failed(&job.id, &info, Utc::now()).await {
                warn!("Failed to record enqueue failure on job {}: {}", job.id, mark_err);
            }
            return Err(Error::EnqueueFailed(err.to_string()));
        }

        info!(
            job_id = %job.id,
            tenant = %params.tenant_id,
            inputs = params.input_file_ids.len(),
            operations = job.get_operations().len(),
            queue = %job.priority_class,
            is_merge,
            "Job created and queued"
        );

        Ok(job)
    }

    /// Resolve file ids referenced from operation params (e.g.
    /// `addAudio.audioPath`) to storage paths in place. Values that are
    /// already paths (retries re-submit resolved operations) pass through.
    async fn resolve_operation_refs(
        &self,
        mut operations: Vec<Operation>,
    ) -> Result<Vec<Operation>> {
        for op in operations.iter_mut() {
            if op.kind != "addAudio" {
                continue;
            }
            let Some(serde_json::Value::String(reference)) = op.params.get("audioPath") else {
                continue;
            };
            if reference.is_empty() {
                continue;
            }
            match self.files.get_file(reference).await {
                Ok(file) => {
                    op.params.insert(
                        "audioPath".to_string(),
                        serde_json::Value::String(file.storage_path),
                    );
                }
                Err(Error::NotFound { .. }) if reference.contains('/') => {
                    // Already a storage path.
                }
                Err(Error::NotFound { .. }) => {
                    return Err(Error::FileNotFound(reference.clone()));
                }
                Err(other) => return Err(other),
            }
        }
        Ok(operations)
    }

    /// Fresh read of a job row; no cache in front of the store.
    pub async fn get(&self, id: &str) -> Result<JobDbModel> {
        self.jobs.get_job(id).await
    }

    /// The tenant's jobs, newest first, optionally filtered by status.
    pub async fn list(
        &self,
        tenant_id: &str,
        status: Option<JobStatus>,
    ) -> Result<Vec<JobDbModel>> {
        let owner_id = if is_anonymous_tenant(tenant_id) {
            None
        } else {
            Some(tenant_id)
        };
        self.jobs.list_jobs_by_owner(owner_id, status).await
    }

    /// Cancel a non-terminal job.
    ///
    /// Cooperative for the subprocess: a running executor is not
    /// interrupted, but its terminal writes will lose against this row.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let job = self.jobs.get_job(id).await?;
        if job.is_terminal() {
            return Err(Error::illegal_state(job.status, "cancelled"));
        }

        let rows = self.jobs.mark_cancelled(id, Utc::now()).await?;
        if rows == 0 {
            let fresh = self.jobs.get_job(id).await?;
            return Err(Error::illegal_state(fresh.status, "cancelled"));
        }

        self.bus.publish(id, JobEvent::Cancelled);
        info!(job_id = %id, "Job cancelled");
        Ok(())
    }

    /// Remove the row regardless of state; referenced files are untouched.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let rows = self.jobs.delete_job(id).await?;
        if rows == 0 {
            return Err(Error::not_found("Job", id));
        }
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    /// Re-submit a failed job as a new one with identical inputs and
    /// operations. The old row is unchanged.
    pub async fn retry(&self, id: &str) -> Result<JobDbModel> {
        let old = self.jobs.get_job(id).await?;
        if old.get_status() != Some(JobStatus::Failed) {
            return Err(Error::illegal_state(old.status, "queued"));
        }

        let new_job = self
            .create(CreateJobParams {
                tenant_id: old.owner_id.clone().unwrap_or_else(|| "anonymous".to_string()),
                input_file_ids: old.get_input_file_ids(),
                operations: old.get_operations(),
                output_format: old.output_format.clone(),
                output_file_name: Some(old.output_file_name.clone()),
                input_duration_seconds: old.input_duration_seconds,
            })
            .await?;

        info!(old_job_id = %id, new_job_id = %new_job.id, "Job retried");
        Ok(new_job)
    }

    /// Idempotent progress write; silently refused once the row is
    /// terminal. Publishes a progress event for each accepted write.
    pub async fn update_progress(
        &self,
        id: &str,
        percent: i32,
        current_operation: &str,
        eta_seconds: i64,
    ) -> Result<()> {
        let progress = JobProgress {
            percent,
            current_operation: if current_operation.is_empty() {
                None
            } else {
                Some(current_operation.to_string())
            },
            eta_seconds,
        };
        let rows = self.jobs.update_progress(id, &progress, Utc::now()).await?;
        if rows > 0 {
            self.bus.publish(
                id,
                JobEvent::Progress {
                    percent,
                    current_operation: progress.current_operation,
                    eta_seconds,
                },
            );
        }
        Ok(())
    }

    /// Terminal transition to `completed`. Idempotent: a second call (or a
    /// call racing a cancel) is a no-op and publishes nothing.
    pub async fn complete(&self, id: &str, output_file_id: &str) -> Result<()> {
        let job = self.jobs.get_job(id).await?;
        let rows = self.jobs.mark_completed(id, output_file_id, Utc::now()).await?;
        if rows == 0 {
            return Ok(());
        }

        // Record consumed quota for authenticated owners. Failures here
        // only log: the artifact exists and the job is complete.
        if let Some(owner) = &job.owner_id {
            if job.conversion_minutes > 0 {
                if let Err(err) = self.quota.record_minutes(owner, job.conversion_minutes).await {
                    warn!(
                        job_id = %id,
                        tenant = %owner,
                        "Failed to record conversion minutes: {}",
                        err
                    );
                }
            }
        }

        self.bus.publish(
            id,
            JobEvent::Completed {
                output_file_id: output_file_id.to_string(),
            },
        );
        info!(job_id = %id, output_file_id, "Job completed");
        Ok(())
    }

    /// Terminal transition to `failed`. Idempotent; publishes only when
    /// the row actually flipped.
    pub async fn fail(&self, id: &str, code: &str, message: &str, retryable: bool) -> Result<()> {
        let info = JobErrorInfo {
            code: code.to_string(),
            message: message.to_string(),
            retryable,
        };
        let rows = self.jobs.mark_failed(id, &info, Utc::now()).await?;
        if rows > 0 {
            self.bus.publish(
                id,
                JobEvent::Failed {
                    message: message.to_string(),
                },
            );
            warn!(job_id = %id, code, retryable, "Job failed: {}", message);
        }
        Ok(())
    }

    /// Human-readable log lines synthesized from the job row.
    pub async fn job_logs(&self, id: &str) -> Result<Vec<String>> {
        let job = self.jobs.get_job(id).await?;

        let mut logs = vec![format!("[{}] Job created", job.created_at.to_rfc3339())];

        if let Some(started) = job.started_at {
            logs.push(format!("[{}] Processing started", started.to_rfc3339()));
        }

        let progress = job.get_progress();
        if let Some(current) = progress.current_operation.as_deref() {
            logs.push(format!(
                "[{}] {} ({}%)",
                Utc::now().to_rfc3339(),
                current,
                progress.percent
            ));
        }

        if let Some(completed) = job.completed_at {
            match job.get_status() {
                Some(JobStatus::Completed) => logs.push(format!(
                    "[{}] Job completed successfully",
                    completed.to_rfc3339()
                )),
                Some(JobStatus::Failed) => {
                    let message = job
                        .get_error()
                        .map(|e| e.message)
                        .unwrap_or_else(|| "unknown error".to_string());
                    logs.push(format!("[{}] Job failed: {}", completed.to_rfc3339(), message));
                }
                Some(JobStatus::Cancelled) => {
                    logs.push(format!("[{}] Job cancelled", completed.to_rfc3339()))
                }
                _ => {}
            }
        }

        Ok(logs)
    }
}
