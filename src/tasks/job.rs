//! Job contract and registry

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::tasklog::TaskLogger;
use crate::errors::{FleetError, Result};

/// Job types understood by the fleet engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    Provision,
    InitializeProvider,
    VerifyReplication,
    RotateKeys,
}

impl JobKind {
    pub const ALL: [JobKind; 4] =
        [Self::Provision, Self::InitializeProvider, Self::VerifyReplication, Self::RotateKeys];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provision => "provision",
            Self::InitializeProvider => "initializeProvider",
            Self::VerifyReplication => "verifyReplication",
            Self::RotateKeys => "rotateKeys",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-execution handles passed to [`Job::run`]
#[derive(Debug, Clone)]
pub struct JobContext {
    pub task_id: String,
    pub log: TaskLogger,
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn new(log: TaskLogger, cancel: CancellationToken) -> Self {
        Self { task_id: log.task_id().to_string(), log, cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Step boundary. Returns `Cancelled` once cancellation was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(FleetError::cancelled(&self.task_id))
        } else {
            Ok(())
        }
    }
}

/// How a job finished when it did not return an error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub result: serde_json::Value,
}

impl JobOutcome {
    pub fn success(result: serde_json::Value) -> Self {
        Self { succeeded: true, result }
    }

    pub fn failure(result: serde_json::Value) -> Self {
        Self { succeeded: false, result }
    }

    pub fn from_flag(succeeded: bool, result: serde_json::Value) -> Self {
        Self { succeeded, result }
    }
}

/// A unit of background work. `args` is the JSON object given at submission.
#[async_trait]
pub trait Job: Send + Sync {
    fn kind(&self) -> &str;

    /// Reject malformed arguments before the job is queued
    fn validate_args(&self, _args: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    async fn run(&self, ctx: JobContext, args: serde_json::Value) -> Result<JobOutcome>;
}

/// Job types by name
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry").field("kinds", &self.kinds()).finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job under its [`Job::kind`], replacing any previous one
    pub fn register(&mut self, job: Arc<dyn Job>) -> &mut Self {
        self.jobs.insert(job.kind().to_string(), job);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.jobs.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

/// Read a required integer argument
pub fn id_arg(args: &serde_json::Value, name: &str) -> Result<i64> {
    args.get(name)
        .and_then(serde_json::Value::as_i64)
        .ok_or_else(|| FleetError::validation_field(format!("Missing integer argument '{}'", name), name))
}

/// Read an optional boolean argument, defaulting to `false`
pub fn flag_arg(args: &serde_json::Value, name: &str) -> bool {
    args.get(name).and_then(serde_json::Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl Job for Noop {
        fn kind(&self) -> &str {
            "noop"
        }

        async fn run(&self, _ctx: JobContext, _args: serde_json::Value) -> Result<JobOutcome> {
            Ok(JobOutcome::success(serde_json::Value::Null))
        }
    }

    #[test]
    fn kind_names_are_camel_case() {
        assert_eq!(JobKind::InitializeProvider.as_str(), "initializeProvider");
        assert_eq!(serde_json::to_value(JobKind::RotateKeys).unwrap(), json!("rotateKeys"));
    }

    #[test]
    fn registry_lookup() {
        let mut registry = JobRegistry::new();
        registry.register(Arc::new(Noop));
        assert!(registry.get("noop").is_some());
        assert!(registry.get("provision").is_none());
        assert_eq!(registry.kinds(), vec!["noop".to_string()]);
    }

    #[test]
    fn argument_helpers() {
        let args = json!({"server_id": 3, "force": true});
        assert_eq!(id_arg(&args, "server_id").unwrap(), 3);
        assert!(id_arg(&args, "policy_id").is_err());
        assert!(flag_arg(&args, "force"));
        assert!(!flag_arg(&args, "missing"));
    }
}
