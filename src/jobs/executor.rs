//! Media-process task handler.
//!
//! Consumes `media:process` tasks from the work queue: stages inputs,
//! drives the media tool with a progress pump, finalizes the output
//! artifact and writes the terminal state. Idempotent under at-least-once
//! delivery: a redelivered task for a terminal job acknowledges without
//! doing work, and terminal writes lose cleanly against a racing cancel.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::database::models::FileDbModel;
use crate::database::repositories::FileRepository;
use crate::jobs::operations::{self, Op, Operation};
use crate::jobs::service::JobService;
use crate::media::{MediaRunner, MergeOptions, ProcessOptions, ProgressReporter};
use crate::queue::{TaskHandler, TASK_MEDIA_PROCESS};
use crate::{Error, Result};

/// Queue payload for media-process tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaProcessPayload {
    pub job_id: String,
    pub input_path: String,
    /// Set for merge jobs (multiple inputs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_paths: Option<Vec<String>>,
    pub output_path: String,
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub use_gpu: bool,
}

impl MediaProcessPayload {
    fn all_input_paths(&self) -> Vec<String> {
        match &self.input_paths {
            Some(paths) if !paths.is_empty() => paths.clone(),
            _ => vec![self.input_path.clone()],
        }
    }
}

/// Executor for `media:process` tasks.
pub struct MediaProcessHandler {
    service: Arc<JobService>,
    files: Arc<dyn FileRepository>,
    media: Arc<dyn MediaRunner>,
}

impl MediaProcessHandler {
    pub fn new(
        service: Arc<JobService>,
        files: Arc<dyn FileRepository>,
        media: Arc<dyn MediaRunner>,
    ) -> Self {
        Self {
            service,
            files,
            media,
        }
    }

    async fn record_failure(&self, job_id: &str, code: &str, message: &str, retryable: bool) {
        if let Err(err) = self.service.fail(job_id, code, message, retryable).await {
            warn!(job_id, "Failed to record job failure: {}", err);
        }
    }

    async fn execute(&self, payload: MediaProcessPayload, cancel: CancellationToken) -> Result<()> {
        let job_id = payload.job_id.clone();

        // Redelivery of a finished or cancelled job: acknowledge, no work.
        let job = match self.service.get(&job_id).await {
            Ok(job) => job,
            Err(Error::NotFound { .. }) => {
                warn!(job_id = %job_id, "Job row gone, dropping task");
                return Ok(());
            }
            Err(err) => return Err(err),
        };
        if job.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "Job already terminal, skipping");
            return Ok(());
        }

        self.service
            .update_progress(&job_id, 0, "Starting...", 0)
            .await?;

        // Normalization failures are permanent: no amount of retries makes
        // an unknown operation known. Fail and acknowledge.
        let ops: Vec<Op> = match operations::normalize_all(&payload.operations) {
            Ok(ops) => ops,
            Err(err) => {
                self.record_failure(&job_id, err.code(), &err.to_string(), false)
                    .await;
                return Ok(());
            }
        };

        // Stage inputs. Guards release staged copies on every exit path.
        let storage = self.service.storage().clone();
        let mut local_inputs = Vec::new();
        let mut release_guards = Vec::new();
        for path in payload.all_input_paths() {
            match storage.prepare_input(&path).await {
                Ok((local, guard)) => {
                    local_inputs.push(local);
                    release_guards.push(guard);
                }
                Err(err) => {
                    self.record_failure(&job_id, "PROCESSING_ERROR", &err.to_string(), true)
                        .await;
                    return Err(err);
                }
            }
        }

        // Local output path for the tool; remote backends upload afterward.
        let local_output = if storage.is_remote() {
            let staging_dir = std::env::temp_dir().join("mediaconv");
            tokio::fs::create_dir_all(&staging_dir).await?;
            let file_name = Path::new(&payload.output_path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| job_id.clone());
            staging_dir.join(file_name).to_string_lossy().to_string()
        } else {
            if let Some(parent) = Path::new(&payload.output_path).parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            payload.output_path.clone()
        };

        // Progress pump: the tool's callback is a try_send into this
        // channel, the pump does the blocking DB/bus work.
        let (reporter, mut progress_rx) = ProgressReporter::channel(64);
        let pump_service = self.service.clone();
        let pump_job_id = job_id.clone();
        let pump = tokio::spawn(async move {
            while let Some(update) = progress_rx.recv().await {
                if let Err(err) = pump_service
                    .update_progress(&pump_job_id, update.percent, &update.operation, 0)
                    .await
                {
                    warn!(job_id = %pump_job_id, "Progress update failed: {}", err);
                }
            }
        });

        let duration_hint = (job.input_duration_seconds > 0.0).then_some(job.input_duration_seconds);
        let use_merge = ops.iter().any(|op| matches!(op, Op::Merge)) || local_inputs.len() >= 2;

        let run_result = if use_merge {
            self.media
                .merge(
                    MergeOptions {
                        input_paths: local_inputs.clone(),
                        output_path: local_output.clone(),
                        use_hardware_accel: payload.use_gpu,
                        duration_hint,
                    },
                    reporter.clone(),
                    cancel.clone(),
                )
                .await
        } else {
            self.media
                .process(
                    ProcessOptions {
                        input_path: local_inputs[0].clone(),
                        output_path: local_output.clone(),
                        operations: ops,
                        use_hardware_accel: payload.use_gpu,
                        duration_hint,
                    },
                    reporter.clone(),
                    cancel.clone(),
                )
                .await
        };

        drop(reporter);
        let _ = pump.await;

        if let Err(err) = run_result {
            self.record_failure(&job_id, "PROCESSING_ERROR", &err.to_string(), true)
                .await;
            for guard in release_guards.iter_mut().rev() {
                guard.release();
            }
            return Err(err);
        }

        // The artifact must exist and have a size before we publish it.
        let output_size = match tokio::fs::metadata(&local_output).await {
            Ok(meta) => meta.len() as i64,
            Err(err) => {
                let message = format!("output file not found: {}", err);
                self.record_failure(&job_id, "PROCESSING_ERROR", &message, false)
                    .await;
                return Err(Error::media(message));
            }
        };

        if storage.is_remote() {
            if let Err(err) = storage
                .finalize_output(&payload.output_path, &local_output)
                .await
            {
                // The queue retry will re-run the tool; accepted cost of
                // at-least-once.
                self.record_failure(&job_id, "PROCESSING_ERROR", &err.to_string(), true)
                    .await;
                return Err(err);
            }
            let _ = tokio::fs::remove_file(&local_output).await;
        }

        // Output file row. The artifact already lives at its deterministic
        // path, so a failed insert degrades metadata but not the result.
        let output_file_name = Path::new(&payload.output_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| job_id.clone());
        let file = FileDbModel::new_output(
            &job_id,
            job.owner_id.clone(),
            output_file_name,
            &payload.output_path,
            output_size,
            Utc::now(),
        );
        if let Err(err) = self.files.create_file(&file).await {
            warn!(job_id = %job_id, "Failed to insert output file row: {}", err);
        }

        self.service.complete(&job_id, &file.id).await?;

        for guard in release_guards.iter_mut().rev() {
            guard.release();
        }

        info!(
            job_id = %job_id,
            output = %payload.output_path,
            output_size,
            "Media processing completed"
        );
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for MediaProcessHandler {
    fn task_type(&self) -> &'static str {
        TASK_MEDIA_PROCESS
    }

    async fn handle(&self, payload: serde_json::Value, cancel: CancellationToken) -> Result<()> {
        let payload: MediaProcessPayload = serde_json::from_value(payload)
            .map_err(|e| Error::validation(format!("bad media:process payload: {}", e)))?;
        self.execute(payload, cancel).await
    }

    /// Retry budget exhausted: leave the last recorded failure in place,
    /// or record a non-retryable one if no terminal write landed.
    async fn on_exhausted(&self, payload: serde_json::Value) {
        let Ok(payload) = serde_json::from_value::<MediaProcessPayload>(payload) else {
            return;
        };
        self.record_failure(
            &payload.job_id,
            "PROCESSING_ERROR",
            "retry attempts exhausted",
            false,
        )
        .await;
    }
}
