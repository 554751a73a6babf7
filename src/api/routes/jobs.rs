//! Job management routes.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | POST | `/api/v1/jobs` | Submit a processing job |
//! | GET | `/api/v1/jobs?status=` | List the tenant's jobs |
//! | GET | `/api/v1/jobs/{id}` | Get a single job |
//! | POST | `/api/v1/jobs/{id}/cancel` | Cancel a non-terminal job |
//! | POST | `/api/v1/jobs/{id}/retry` | Re-submit a failed job |
//! | DELETE | `/api/v1/jobs/{id}` | Delete the job row |
//! | GET | `/api/v1/jobs/{id}/logs` | Derived human-readable log lines |

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::database::models::{JobDbModel, JobErrorInfo, JobProgress, JobStatus};
use crate::jobs::{CreateJobParams, Operation};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_job).get(list_jobs))
        .route("/{id}", get(get_job).delete(delete_job))
        .route("/{id}/cancel", post(cancel_job))
        .route("/{id}/retry", post(retry_job))
        .route("/{id}/logs", get(job_logs))
}

/// Tenant identity resolved by the auth collaborator upstream; absent
/// means an anonymous request.
pub(crate) fn tenant_id(headers: &HeaderMap) -> String {
    headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Request body for job submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    /// Single input file id.
    #[serde(default)]
    pub input_file_id: Option<String>,
    /// Multiple input file ids (merge).
    #[serde(default)]
    pub input_file_ids: Option<Vec<String>>,
    #[serde(default)]
    pub operations: Vec<Operation>,
    pub output_format: String,
    #[serde(default)]
    pub output_file_name: Option<String>,
    /// From the client-side probe, for conversion minutes.
    #[serde(default)]
    pub input_duration_seconds: f64,
}

/// Job as returned by the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub status: String,
    pub priority_class: String,
    pub input_file_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file_id: Option<String>,
    pub operations: Vec<Operation>,
    pub output_format: String,
    pub output_file_name: String,
    pub progress: JobProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobErrorInfo>,
    pub conversion_minutes: i64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JobDbModel> for JobResponse {
    fn from(job: JobDbModel) -> Self {
        Self {
            owner_id: job.owner_id.clone(),
            status: job.status.clone(),
            priority_class: job.priority_class.clone(),
            input_file_ids: job.get_input_file_ids(),
            output_file_id: job.output_file_id.clone(),
            operations: job.get_operations(),
            output_format: job.output_format.clone(),
            output_file_name: job.output_file_name.clone(),
            progress: job.get_progress(),
            error: job.get_error(),
            conversion_minutes: job.conversion_minutes,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            id: job.id,
        }
    }
}

pub async fn create_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobResponse>)> {
    let mut input_file_ids = req.input_file_ids.unwrap_or_default();
    if input_file_ids.is_empty() {
        if let Some(id) = req.input_file_id.filter(|id| !id.is_empty()) {
            input_file_ids.push(id);
        }
    }

    let job = state
        .jobs
        .create(CreateJobParams {
            tenant_id: tenant_id(&headers),
            input_file_ids,
            operations: req.operations,
            output_format: req.output_format,
            output_file_name: req.output_file_name,
            input_duration_seconds: req.input_duration_seconds,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(job.into())))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsParams {
    pub status: Option<String>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListJobsParams>,
) -> ApiResult<Json<Vec<JobResponse>>> {
    let status = match params.status.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            JobStatus::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("unknown status '{}'", raw)))?,
        ),
        None => None,
    };

    let jobs = state.jobs.list(&tenant_id(&headers), status).await?;
    Ok(Json(jobs.into_iter().map(JobResponse::from).collect()))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.jobs.get(&id).await?;
    Ok(Json(job.into()))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.jobs.cancel(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn retry_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let job = state.jobs.retry(&id).await?;
    Ok(Json(job.into()))
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.jobs.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLogsResponse {
    pub job_id: String,
    pub logs: Vec<String>,
}

pub async fn job_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<JobLogsResponse>> {
    let logs = state.jobs.job_logs(&id).await?;
    Ok(Json(JobLogsResponse { job_id: id, logs }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_defaults_to_anonymous() {
        let headers = HeaderMap::new();
        assert_eq!(tenant_id(&headers), "anonymous");

        let mut headers = HeaderMap::new();
        headers.insert("x-tenant-id", "user-42".parse().unwrap());
        assert_eq!(tenant_id(&headers), "user-42");
    }

    #[test]
    fn test_create_request_accepts_both_input_shapes() {
        let single: CreateJobRequest = serde_json::from_str(
            r#"{"inputFileId":"f-1","operations":[],"outputFormat":"mp4"}"#,
        )
        .unwrap();
        assert_eq!(single.input_file_id.as_deref(), Some("f-1"));

        let multi: CreateJobRequest = serde_json::from_str(
            r#"{"inputFileIds":["f-1","f-2"],"operations":[{"type":"merge","params":{}}],"outputFormat":"mp4"}"#,
        )
        .unwrap();
        assert_eq!(multi.input_file_ids.as_ref().unwrap().len(), 2);
    }
}
