//! Per-task append-only log stream
//!
//! Every component writes progress through a [`TaskLogger`] bound to one task
//! id. Entries for a task are read back in emission order by observers
//! polling the job API.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
    Fail,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fail => "fail",
        }
    }

    /// Levels that mark the surrounding step as failed
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error | Self::Fail)
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "success" => Ok(Self::Success),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "fail" => Ok(Self::Fail),
            _ => Err(format!("Unknown log level: {}", s)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One log line. `extras` holds free-form fields such as `host`, `step` or
/// `server_id`; they are flattened next to `msg` and `level` when serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLogEntry {
    pub msg: String,
    pub level: LogLevel,
    #[serde(flatten, default)]
    pub extras: BTreeMap<String, String>,
}

impl TaskLogEntry {
    pub fn new(level: LogLevel, msg: impl Into<String>) -> Self {
        Self { msg: msg.into(), level, extras: BTreeMap::new() }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.extras.insert(key.into(), value.to_string());
        self
    }
}

/// Backing store for task logs
#[async_trait]
pub trait TaskLogStore: Send + Sync {
    async fn append(&self, task_id: &str, entry: &TaskLogEntry) -> Result<()>;

    /// All entries for a task, oldest first
    async fn read_all(&self, task_id: &str) -> Result<Vec<TaskLogEntry>>;

    async fn purge(&self, task_id: &str) -> Result<()>;
}

/// Log handle bound to one task id.
///
/// Appends are mirrored to `tracing`. A store failure is reported through
/// `tracing` and otherwise ignored so a job never fails because its log could
/// not be written.
#[derive(Clone)]
pub struct TaskLogger {
    store: Arc<dyn TaskLogStore>,
    task_id: String,
    errors: Arc<AtomicUsize>,
}

impl fmt::Debug for TaskLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLogger").field("task_id", &self.task_id).finish_non_exhaustive()
    }
}

impl TaskLogger {
    pub fn new(store: Arc<dyn TaskLogStore>, task_id: impl Into<String>) -> Self {
        Self { store, task_id: task_id.into(), errors: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Number of error/fail entries written so far through this logger
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub async fn entry(&self, entry: TaskLogEntry) {
        match entry.level {
            LogLevel::Debug => tracing::debug!(task_id = %self.task_id, extras = ?entry.extras, "{}", entry.msg),
            LogLevel::Info | LogLevel::Success => {
                tracing::info!(task_id = %self.task_id, level = %entry.level, extras = ?entry.extras, "{}", entry.msg)
            }
            LogLevel::Warning => tracing::warn!(task_id = %self.task_id, extras = ?entry.extras, "{}", entry.msg),
            LogLevel::Error | LogLevel::Fail => {
                tracing::error!(task_id = %self.task_id, level = %entry.level, extras = ?entry.extras, "{}", entry.msg)
            }
        }

        if entry.level.is_error() {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        if let Err(e) = self.store.append(&self.task_id, &entry).await {
            tracing::warn!(task_id = %self.task_id, error = %e, "Failed to append task log entry");
        }
    }

    pub async fn log(&self, level: LogLevel, msg: impl Into<String>) {
        self.entry(TaskLogEntry::new(level, msg)).await;
    }

    pub async fn debug(&self, msg: impl Into<String>) {
        self.log(LogLevel::Debug, msg).await;
    }

    pub async fn info(&self, msg: impl Into<String>) {
        self.log(LogLevel::Info, msg).await;
    }

    pub async fn success(&self, msg: impl Into<String>) {
        self.log(LogLevel::Success, msg).await;
    }

    pub async fn warning(&self, msg: impl Into<String>) {
        self.log(LogLevel::Warning, msg).await;
    }

    pub async fn error(&self, msg: impl Into<String>) {
        self.log(LogLevel::Error, msg).await;
    }

    pub async fn fail(&self, msg: impl Into<String>) {
        self.log(LogLevel::Fail, msg).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::tasklog_memory::MemoryTaskLogStore;

    #[test]
    fn entry_serializes_extras_flat() {
        let entry = TaskLogEntry::new(LogLevel::Info, "Uploading schema").with("host", "ldap1");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["msg"], "Uploading schema");
        assert_eq!(json["level"], "info");
        assert_eq!(json["host"], "ldap1");

        let back: TaskLogEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn error_levels() {
        assert!(LogLevel::Error.is_error());
        assert!(LogLevel::Fail.is_error());
        assert!(!LogLevel::Warning.is_error());
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
    }

    #[tokio::test]
    async fn logger_counts_errors_and_preserves_order() {
        let store = Arc::new(MemoryTaskLogStore::new());
        let logger = TaskLogger::new(store.clone(), "t-1");
        logger.info("one").await;
        logger.error("two").await;
        logger.fail("three").await;
        logger.success("four").await;

        assert_eq!(logger.error_count(), 2);
        let msgs: Vec<String> =
            store.read_all("t-1").await.unwrap().into_iter().map(|e| e.msg).collect();
        assert_eq!(msgs, vec!["one", "two", "three", "four"]);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn logger_mirrors_to_tracing() {
        let store = Arc::new(MemoryTaskLogStore::new());
        let logger = TaskLogger::new(store, "t-trace");
        logger.warning("Test data not found. Retrying...").await;
        assert!(logs_contain("Test data not found"));
        assert!(logs_contain("t-trace"));
    }
}
