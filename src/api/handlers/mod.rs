pub mod health;
pub mod jobs;

pub use health::{health_handler, HealthResponse};
pub use jobs::{
    cancel_job_handler, get_log_handler, submit_job_handler, CancelJobResponse, SubmitJobRequest,
    SubmitJobResponse,
};
