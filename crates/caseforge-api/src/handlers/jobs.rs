//! Job status and cancellation handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use caseforge_core::JobStatusReport;

use crate::{ApiError, AppState};

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CancelJobResponse {
    pub job_id: Uuid,
    /// False when the job had already finished.
    pub cancelled: bool,
}

#[utoipa::path(get, path = "/api/v1/jobs/{id}", tag = "Jobs",
    params(("id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Job status", body = JobStatusReport),
        (status = 404, description = "Job not found"),
    ))]
pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobStatusReport>, ApiError> {
    Ok(Json(state.pipeline.get_job_status(id).await?))
}

/// Cancel a pending or running job. Work in flight is discarded.
#[utoipa::path(post, path = "/api/v1/jobs/{id}/cancel", tag = "Jobs",
    params(("id" = Uuid, Path, description = "Job id")),
    responses(
        (status = 200, description = "Cancellation result", body = CancelJobResponse),
        (status = 404, description = "Job not found"),
    ))]
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelJobResponse>, ApiError> {
    let cancelled = state.pipeline.cancel_job(id).await?;
    info!(job_id = %id, cancelled, "Job cancel requested");
    Ok(Json(CancelJobResponse {
        job_id: id,
        cancelled,
    }))
}
