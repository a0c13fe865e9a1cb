//! Job API tests against an in-process router

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum_test::TestServer;
use dirfleet::api::build_router;
use dirfleet::api::handlers::{CancelJobResponse, HealthResponse, SubmitJobResponse};
use dirfleet::config::ExecutorConfig;
use dirfleet::tasks::{
    Executor, ExecutorHandle, Job, JobContext, JobOutcome, JobRegistry, LogLevel,
    MemoryTaskLogStore, TaskLogEntry, TaskLogView, TaskState,
};
use dirfleet::{FleetError, Result};
use serde_json::json;

/// Logs a greeting for `name` and succeeds
struct GreetJob;

#[async_trait]
impl Job for GreetJob {
    fn kind(&self) -> &str {
        "greet"
    }

    fn validate_args(&self, args: &serde_json::Value) -> Result<()> {
        match args.get("name").and_then(serde_json::Value::as_str) {
            Some(_) => Ok(()),
            None => Err(FleetError::validation_field("Missing 'name'", "name")),
        }
    }

    async fn run(&self, ctx: JobContext, args: serde_json::Value) -> Result<JobOutcome> {
        let name = args["name"].as_str().unwrap_or_default().to_string();
        ctx.log.info("Greeting").await;
        ctx.log.entry(TaskLogEntry::new(LogLevel::Success, format!("Hello {}", name)).with("host", &name)).await;
        Ok(JobOutcome::success(json!({"greeted": name})))
    }
}

/// Blocks until cancelled
struct WaitJob;

#[async_trait]
impl Job for WaitJob {
    fn kind(&self) -> &str {
        "wait"
    }

    async fn run(&self, ctx: JobContext, _args: serde_json::Value) -> Result<JobOutcome> {
        ctx.log.info("Waiting").await;
        ctx.cancel.cancelled().await;
        ctx.checkpoint()?;
        Ok(JobOutcome::success(serde_json::Value::Null))
    }
}

fn start() -> (TestServer, ExecutorHandle) {
    let mut registry = JobRegistry::new();
    registry.register(Arc::new(GreetJob)).register(Arc::new(WaitJob));
    let config = ExecutorConfig { worker_count: 2, ..Default::default() };
    let (executor, handle) = Executor::start(&config, registry, Arc::new(MemoryTaskLogStore::new()));
    let server = TestServer::new(build_router(executor)).unwrap();
    (server, handle)
}

async fn poll_until_terminal(server: &TestServer, task_id: &str) -> TaskLogView {
    for _ in 0..100 {
        let view: TaskLogView = server.get(&format!("/api/v1/log/{}", task_id)).await.json();
        if view.state.is_terminal() {
            return view;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {} did not finish", task_id);
}

#[tokio::test]
async fn health_lists_registered_job_types() {
    let (server, _handle) = start();

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: HealthResponse = response.json();
    assert_eq!(body.status, "ok");
    assert_eq!(body.version, dirfleet::VERSION);
    assert_eq!(body.job_types, vec!["greet".to_string(), "wait".to_string()]);
}

#[tokio::test]
async fn submitted_job_log_is_returned_then_purged() {
    let (server, _handle) = start();

    let response = server.post("/api/v1/jobs").json(&json!({"type": "greet", "args": {"name": "ldap1"}})).await;
    response.assert_status(StatusCode::ACCEPTED);
    let SubmitJobResponse { task_id } = response.json();

    let view = poll_until_terminal(&server, &task_id).await;
    assert_eq!(view.state, TaskState::Success);
    assert_eq!(view.kind, "greet");
    assert_eq!(view.result, Some(json!({"greeted": "ldap1"})));
    assert!(view.finished_at.is_some());
    let msgs: Vec<&str> = view.messages.iter().map(|m| m.msg.as_str()).collect();
    assert_eq!(msgs, vec!["Greeting", "Hello ldap1"]);
    assert_eq!(view.messages[1].extras.get("host").map(String::as_str), Some("ldap1"));

    let again: TaskLogView = server.get(&format!("/api/v1/log/{}", task_id)).await.json();
    assert_eq!(again.state, TaskState::Success);
    assert!(again.messages.is_empty());
}

#[tokio::test]
async fn log_entries_serialize_extras_flat() {
    let (server, _handle) = start();
    let SubmitJobResponse { task_id } =
        server.post("/api/v1/jobs").json(&json!({"type": "greet", "args": {"name": "b"}})).await.json();

    for _ in 0..100 {
        let body: serde_json::Value = server.get(&format!("/api/v1/log/{}", task_id)).await.json();
        if body["state"] == "success" {
            assert_eq!(body["messages"][0], json!({"msg": "Greeting", "level": "info"}));
            assert_eq!(body["messages"][1], json!({"msg": "Hello b", "level": "success", "host": "b"}));
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {} did not finish", task_id);
}

#[tokio::test]
async fn rejects_unknown_type_and_bad_args() {
    let (server, _handle) = start();

    let response = server.post("/api/v1/jobs").json(&json!({"type": "reboot"})).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "bad_request");

    let response = server.post("/api/v1/jobs").json(&json!({"type": "greet", "args": {}})).await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let response = server.post("/api/v1/jobs").json(&json!({"type": "greet", "args": [1, 2]})).await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let (server, _handle) = start();

    let response = server.get("/api/v1/log/does-not-exist").await;
    response.assert_status(StatusCode::NOT_FOUND);

    let response = server.post("/api/v1/jobs/does-not-exist/cancel").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_stops_running_job() {
    let (server, _handle) = start();

    let SubmitJobResponse { task_id } =
        server.post("/api/v1/jobs").json(&json!({"type": "wait"})).await.json();

    for _ in 0..100 {
        let view: TaskLogView = server.get(&format!("/api/v1/log/{}", task_id)).await.json();
        if view.state == TaskState::Running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = server.post(&format!("/api/v1/jobs/{}/cancel", task_id)).await;
    response.assert_status_ok();
    let body: CancelJobResponse = response.json();
    assert!(body.cancelled);

    let view = poll_until_terminal(&server, &task_id).await;
    assert_eq!(view.state, TaskState::Failure);
    assert!(view.messages.iter().any(|m| m.msg == "Task cancelled"));

    let body: CancelJobResponse =
        server.post(&format!("/api/v1/jobs/{}/cancel", task_id)).await.json();
    assert!(!body.cancelled);
}
