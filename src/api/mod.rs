//! # Job API
//!
//! JSON interface over the task executor: submit a job, poll its log by
//! task id, request cancellation.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use routes::{build_router, ApiState};
pub use server::start_api_server;
