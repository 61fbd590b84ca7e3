//! Job API Handlers
//!
//! HTTP endpoints for job lifecycle management. Every handler takes the job
//! kind its route is scoped to; `None` serves the kind-agnostic `/api/jobs`
//! routes.

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;
use ventus_core::domain::job::JobKind;
use ventus_core::dto::job::{CancelResponse, CreateJob, JobAccepted, JobSnapshot};

use crate::api::error::{ApiError, ApiResult};
use crate::service::job_service::{self, JobContext};

// =============================================================================
// Job Lifecycle Endpoints
// =============================================================================

/// POST /api/simulations, POST /api/meshes
/// Create a job and schedule it for execution
pub async fn create_job(
    State(ctx): State<JobContext>,
    Json(req): Json<CreateJob>,
    kind: JobKind,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    tracing::info!("Creating {} job", kind);

    let accepted = job_service::submit_job(&ctx, kind, req)?;

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /api/jobs, GET /api/simulations, GET /api/meshes
/// List job snapshots
pub async fn list_jobs(State(ctx): State<JobContext>, kind: Option<JobKind>) -> Json<Vec<JobSnapshot>> {
    tracing::debug!("Listing jobs (kind: {:?})", kind);

    Json(job_service::list_jobs(&ctx, kind))
}

/// GET /api/jobs/{id}
/// Get a job snapshot by ID
pub async fn get_job(
    State(ctx): State<JobContext>,
    Path(id): Path<Uuid>,
    kind: Option<JobKind>,
) -> ApiResult<Json<JobSnapshot>> {
    tracing::debug!("Getting job: {}", id);

    Ok(Json(job_service::get_job(&ctx, id, kind)?))
}

/// POST /api/jobs/{id}/cancel
/// Request cancellation of a live job
pub async fn cancel_job(
    State(ctx): State<JobContext>,
    Path(id): Path<Uuid>,
    kind: Option<JobKind>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    tracing::info!("Cancelling job: {}", id);

    let response = job_service::cancel_job(&ctx, id, kind)?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /api/jobs/{id}/download
/// Stream the zipped results of a completed job
pub async fn download_results(
    State(ctx): State<JobContext>,
    Path(id): Path<Uuid>,
    kind: Option<JobKind>,
) -> ApiResult<Response> {
    tracing::info!("Downloading results of job: {}", id);

    let (record, path) = job_service::prepare_download(&ctx, id, kind).await?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to open archive: {}", e)))?;
    let stream = ReaderStream::new(file);

    let disposition = format!("attachment; filename=\"{}_{}.zip\"", record.kind, record.id);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

// =============================================================================
// Log Endpoints
// =============================================================================

/// GET /api/jobs/{id}/log
/// Tail of the job's most recent tool log
pub async fn get_job_log(
    State(ctx): State<JobContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<LogQuery>,
    kind: Option<JobKind>,
) -> ApiResult<Response> {
    let lines = query.lines.unwrap_or(job_service::DEFAULT_LOG_LINES);
    tracing::debug!("Getting last {} log lines for job: {}", lines, id);

    let text = job_service::log_tail(&ctx, id, kind, lines).await?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    )
        .into_response())
}

// =============================================================================
// Request Types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub lines: Option<usize>,
}
