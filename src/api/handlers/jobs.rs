//! Job submission, log polling and cancellation

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::api::{error::ApiError, routes::ApiState};
use crate::tasks::TaskLogView;

/// `POST /api/v1/jobs` body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_args")]
    pub args: serde_json::Value,
}

fn empty_args() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub task_id: String,
    /// `false` when the task had already finished
    pub cancelled: bool,
}

#[instrument(skip(state, body), fields(kind = %body.kind))]
pub async fn submit_job_handler(
    State(state): State<ApiState>,
    Json(body): Json<SubmitJobRequest>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    if !body.args.is_object() {
        return Err(ApiError::BadRequest("Job args must be a JSON object".to_string()));
    }
    let task_id = state.executor.submit(&body.kind, body.args)?;
    Ok((StatusCode::ACCEPTED, Json(SubmitJobResponse { task_id })))
}

/// Current state and log entries; the stored log is dropped after the first
/// terminal read
pub async fn get_log_handler(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskLogView>, ApiError> {
    Ok(Json(state.executor.get_log(&task_id).await?))
}

pub async fn cancel_job_handler(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
) -> Result<Json<CancelJobResponse>, ApiError> {
    let cancelled = state.executor.cancel(&task_id)?;
    Ok(Json(CancelJobResponse { task_id, cancelled }))
}
