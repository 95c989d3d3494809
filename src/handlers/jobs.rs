//! # Jobs API Handlers
//!
//! Listing, inspection and control commands for sync jobs.

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::engine::{AdvanceFields, JobFilter, NewSyncJob, ResolutionOutcome};
use crate::error::{ApiError, validation_error};
use crate::handlers::types::JobsPage;
use crate::models::{ConflictResolution, JobStatus, SyncJobRecord, SyncType};
use crate::server::AppState;

/// Query parameters for listing jobs
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListJobsQuery {
    /// Case-insensitive match on integration name or triggering actor
    pub search: Option<String>,
    /// Filter by status (pending, in_progress, success, failed, cancelled)
    pub status: Option<String>,
    /// Filter by sync type (full, incremental, manual)
    pub sync_type: Option<String>,
    /// Maximum number of jobs to return (default: 50, max: 100)
    pub limit: Option<u64>,
    /// Opaque cursor from a previous page
    pub cursor: Option<String>,
}

/// Query parameters for the history export
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ExportQuery {
    /// Only export jobs with this status
    pub status: Option<String>,
}

/// Status change or progress report from an integration executor.
///
/// Unrecognized keys are rejected so a misspelled counter never reads as
/// "not reported".
#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct AdvanceRequest {
    /// Target status; `in_progress` on an in-progress job is a progress report
    pub status: JobStatus,
    /// Absolute number of records processed so far
    pub records_processed: Option<i64>,
    /// Revised number of records at the source, including skipped ones
    pub records_total: Option<i64>,
    /// Errors encountered since the previous report
    pub errors_increment: Option<i64>,
    /// Required when moving to `failed`
    pub error_message: Option<String>,
    /// Absolute bytes moved so far
    pub data_size: Option<i64>,
    /// Reported bytes per second
    pub throughput: Option<f64>,
    /// Newly detected conflicts
    pub conflicts: Option<i64>,
    /// Strategy to use for conflicts on this job
    pub conflict_resolution: Option<ConflictResolution>,
}

impl AdvanceRequest {
    pub fn into_parts(self) -> (JobStatus, AdvanceFields) {
        let fields = AdvanceFields {
            records_processed: self.records_processed,
            records_total: self.records_total,
            errors_increment: self.errors_increment,
            error_message: self.error_message,
            data_size: self.data_size,
            throughput: self.throughput,
            conflicts: self.conflicts,
            conflict_resolution: self.conflict_resolution,
        };
        (self.status, fields)
    }
}

/// Operator decision for outstanding conflicts
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct ResolveConflictsRequest {
    pub strategy: ConflictResolution,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResolveConflictsResponse {
    pub job: SyncJobRecord,
    pub outcome: ResolutionOutcome,
}

fn parse_status(value: &str) -> Result<JobStatus, ApiError> {
    JobStatus::parse(value).ok_or_else(|| {
        validation_error(
            "Invalid status",
            serde_json::json!({
                "status": "Must be one of: pending, in_progress, success, failed, cancelled"
            }),
        )
    })
}

fn parse_sync_type(value: &str) -> Result<SyncType, ApiError> {
    SyncType::parse(value).ok_or_else(|| {
        validation_error(
            "Invalid sync_type",
            serde_json::json!({
                "sync_type": "Must be one of: full, incremental, manual"
            }),
        )
    })
}

/// List jobs, most recent first
#[utoipa::path(
    get,
    path = "/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Page of jobs", body = JobsPage),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<Json<JobsPage>, ApiError> {
    let Query(params) = query?;

    let filter = JobFilter {
        search: params.search,
        status: params.status.as_deref().map(parse_status).transpose()?,
        sync_type: params.sync_type.as_deref().map(parse_sync_type).transpose()?,
    };

    let page = state
        .engine
        .list_jobs(&filter, params.limit, params.cursor.as_deref())
        .await?;

    Ok(Json(JobsPage::new(
        page.jobs.into_iter().map(SyncJobRecord::from).collect(),
        page.next_cursor,
    )))
}

/// Create a pending job from an external trigger
#[utoipa::path(
    post,
    path = "/jobs",
    request_body = NewSyncJob,
    responses(
        (status = 201, description = "Job created", body = SyncJobRecord),
        (status = 400, description = "Invalid request", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<AppState>,
    body: Result<Json<NewSyncJob>, JsonRejection>,
) -> Result<(StatusCode, Json<SyncJobRecord>), ApiError> {
    let Json(request) = body?;
    let job = state.engine.create_job(request).await?;
    Ok((StatusCode::CREATED, Json(job.into())))
}

/// Fetch one job
#[utoipa::path(
    get,
    path = "/jobs/{id}",
    params(("id" = Uuid, Path, description = "Job identifier")),
    responses(
        (status = 200, description = "Job snapshot", body = SyncJobRecord),
        (status = 404, description = "Job not found", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SyncJobRecord>, ApiError> {
    let Path(job_id) = path?;
    let job = state.engine.get_job(job_id).await?;
    Ok(Json(job.into()))
}

/// Every job in the retry chain of the given job, original first
#[utoipa::path(
    get,
    path = "/jobs/{id}/lineage",
    params(("id" = Uuid, Path, description = "Any job in the chain")),
    responses(
        (status = 200, description = "Retry chain", body = [SyncJobRecord]),
        (status = 404, description = "Job not found", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_lineage(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<Vec<SyncJobRecord>>, ApiError> {
    let Path(job_id) = path?;
    let chain = state.engine.lineage(job_id).await?;
    Ok(Json(chain.into_iter().map(SyncJobRecord::from).collect()))
}

/// Report progress or move a job to a new status
#[utoipa::path(
    post,
    path = "/jobs/{id}/advance",
    params(("id" = Uuid, Path, description = "Job identifier")),
    request_body = AdvanceRequest,
    responses(
        (status = 200, description = "Updated job", body = SyncJobRecord),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Transition rejected", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn advance_job(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<AdvanceRequest>, JsonRejection>,
) -> Result<Json<SyncJobRecord>, ApiError> {
    let Path(job_id) = path?;
    let Json(request) = body?;
    let (status, fields) = request.into_parts();
    let job = state.engine.advance(job_id, status, fields).await?;
    Ok(Json(job.into()))
}

/// Pause (cancel) an in-progress job
#[utoipa::path(
    post,
    path = "/jobs/{id}/pause",
    params(("id" = Uuid, Path, description = "Job identifier")),
    responses(
        (status = 200, description = "Cancelled job", body = SyncJobRecord),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job is not in progress", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn pause_job(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SyncJobRecord>, ApiError> {
    let Path(job_id) = path?;
    let job = state.engine.pause(job_id).await?;
    Ok(Json(job.into()))
}

/// Create a pending replacement for a failed or cancelled job
#[utoipa::path(
    post,
    path = "/jobs/{id}/retry",
    params(("id" = Uuid, Path, description = "Failed or cancelled job")),
    responses(
        (status = 201, description = "Retry job created", body = SyncJobRecord),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job not retryable or retry limit exceeded", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn retry_job(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<(StatusCode, Json<SyncJobRecord>), ApiError> {
    let Path(job_id) = path?;
    let job = state.engine.retry(job_id).await?;
    Ok((StatusCode::CREATED, Json(job.into())))
}

/// Apply an operator decision to a job's outstanding conflicts
#[utoipa::path(
    post,
    path = "/jobs/{id}/conflicts/resolve",
    params(("id" = Uuid, Path, description = "Job identifier")),
    request_body = ResolveConflictsRequest,
    responses(
        (status = 200, description = "Resolution applied", body = ResolveConflictsResponse),
        (status = 404, description = "Job not found", body = ApiError),
        (status = 409, description = "Job is not in progress", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn resolve_conflicts(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    body: Result<Json<ResolveConflictsRequest>, JsonRejection>,
) -> Result<Json<ResolveConflictsResponse>, ApiError> {
    let Path(job_id) = path?;
    let Json(request) = body?;
    let result = state
        .engine
        .resolve_conflicts(job_id, request.strategy)
        .await?;

    Ok(Json(ResolveConflictsResponse {
        job: result.job.into(),
        outcome: result.outcome,
    }))
}

/// Full job history in the stable record schema
#[utoipa::path(
    get,
    path = "/export/jobs",
    params(ExportQuery),
    responses(
        (status = 200, description = "All jobs", body = [SyncJobRecord]),
        (status = 400, description = "Invalid status filter", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn export_jobs(
    State(state): State<AppState>,
    query: Result<Query<ExportQuery>, QueryRejection>,
) -> Result<Json<Vec<SyncJobRecord>>, ApiError> {
    let Query(params) = query?;
    let status = params.status.as_deref().map(parse_status).transpose()?;

    let jobs = state.engine.history(status).await?;
    Ok(Json(jobs.into_iter().map(SyncJobRecord::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_filter() {
        assert_eq!(parse_status("in_progress").unwrap(), JobStatus::InProgress);

        let err = parse_status("running").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code.as_ref(), "VALIDATION_FAILED");
    }

    #[test]
    fn test_parse_sync_type_filter() {
        assert_eq!(parse_sync_type("full").unwrap(), SyncType::Full);
        assert!(parse_sync_type("webhook").is_err());
    }

    #[test]
    fn test_advance_request_splits_status_and_fields() {
        let request: AdvanceRequest = serde_json::from_value(serde_json::json!({
            "status": "success",
            "records_processed": 100,
            "data_size": 2048
        }))
        .unwrap();

        let (status, fields) = request.into_parts();
        assert_eq!(status, JobStatus::Success);
        assert_eq!(fields.records_processed, Some(100));
        assert_eq!(fields.data_size, Some(2048));
        assert_eq!(fields.error_message, None);
    }

    #[test]
    fn test_advance_request_rejects_misspelled_counter() {
        let result = serde_json::from_value::<AdvanceRequest>(serde_json::json!({
            "status": "in_progress",
            "record_processed": 10
        }));

        let err = result.unwrap_err().to_string();
        assert!(err.contains("record_processed"));
    }
}
