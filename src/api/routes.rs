use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::tasks::Executor;

use super::handlers::{cancel_job_handler, get_log_handler, health_handler, submit_job_handler};

#[derive(Clone)]
pub struct ApiState {
    pub executor: Executor,
}

pub fn build_router(executor: Executor) -> Router {
    let state = ApiState { executor };

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/jobs", post(submit_job_handler))
        .route("/api/v1/jobs/{task_id}/cancel", post(cancel_job_handler))
        .route("/api/v1/log/{task_id}", get(get_log_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
