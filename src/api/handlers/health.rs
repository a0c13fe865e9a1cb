//! Health check endpoint for monitoring and readiness checks

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::api::routes::ApiState;

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status (always "ok" when responding)
    pub status: String,
    pub version: String,
    /// Registered job types
    pub job_types: Vec<String>,
}

/// Returns 200 OK when the API server is operational
pub async fn health_handler(State(state): State<ApiState>) -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: crate::VERSION.to_string(),
            job_types: state.executor.kinds(),
        }),
    )
}
