//! Background job executor
//!
//! A bounded queue feeds a pool of worker tasks that share the receiver.
//! Each job runs on its own spawned task so a panic is contained and turned
//! into a `failure` state with an `error` log entry. Finished tasks are kept
//! for the configured retention and then dropped together with their log.
//!
//! ```text
//! submit() -> mpsc (bounded) -> worker 0..N -> tokio::spawn(job.run)
//!                                                   |
//!                                        TaskLogStore + task state
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use super::job::{Job, JobContext, JobOutcome, JobRegistry};
use super::tasklog::{TaskLogEntry, TaskLogStore, TaskLogger};
use crate::config::ExecutorConfig;
use crate::errors::{FleetError, Result};
use crate::job_span;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Failure,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }
}

#[derive(Debug, Clone)]
struct TaskRecord {
    kind: String,
    state: TaskState,
    cancel: CancellationToken,
    result: Option<serde_json::Value>,
    submitted_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    /// Set once a terminal state has been returned by `get_log`
    observed: bool,
}

/// Log view returned to observers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLogView {
    pub task_id: String,
    pub kind: String,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub messages: Vec<TaskLogEntry>,
}

struct QueuedTask {
    task_id: String,
    job: Arc<dyn Job>,
    args: serde_json::Value,
}

struct Shared {
    registry: JobRegistry,
    tasks: DashMap<String, TaskRecord>,
    log_store: Arc<dyn TaskLogStore>,
    retention: Duration,
}

/// Cloneable submission and observation handle
#[derive(Clone)]
pub struct Executor {
    shared: Arc<Shared>,
    sender: mpsc::Sender<QueuedTask>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("registry", &self.shared.registry)
            .field("tasks", &self.shared.tasks.len())
            .finish()
    }
}

/// Handle for stopping the worker pool
pub struct ExecutorHandle {
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl ExecutorHandle {
    /// Stop taking new work. Running jobs finish first.
    pub fn shutdown(&self) {
        info!("Shutting down job executor");
        self.shutdown.cancel();
    }

    pub async fn join(self) {
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

impl Executor {
    /// Spawn the worker pool
    pub fn start(
        config: &ExecutorConfig,
        registry: JobRegistry,
        log_store: Arc<dyn TaskLogStore>,
    ) -> (Self, ExecutorHandle) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let shared = Arc::new(Shared {
            registry,
            tasks: DashMap::new(),
            log_store,
            retention: config.retention(),
        });
        let shutdown = CancellationToken::new();

        info!(
            worker_count = config.worker_count,
            queue_capacity = config.queue_capacity,
            retention_secs = config.retention_secs,
            kinds = ?shared.registry.kinds(),
            "Starting job executor"
        );

        let mut workers: Vec<JoinHandle<()>> = (0..config.worker_count.max(1))
            .map(|worker_id| {
                let receiver = Arc::clone(&receiver);
                let shared = Arc::clone(&shared);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    debug!(worker_id, "Job worker started");
                    loop {
                        let next = tokio::select! {
                            _ = shutdown.cancelled() => None,
                            task = async { receiver.lock().await.recv().await } => task,
                        };
                        match next {
                            Some(task) => execute(&shared, task).await,
                            None => break,
                        }
                    }
                    debug!(worker_id, "Job worker stopped");
                })
            })
            .collect();

        let executor = Self { shared, sender };
        workers.push(executor.spawn_reaper(shutdown.clone()));
        (executor, ExecutorHandle { shutdown, workers })
    }

    /// Periodically drop tasks that finished longer than the retention ago
    fn spawn_reaper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let executor = self.clone();
        let period = (self.shared.retention / 4).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = executor.evict_finished(executor.shared.retention).await {
                            warn!(error = %e, "Failed to evict finished tasks");
                        }
                    }
                }
            }
        })
    }

    pub fn kinds(&self) -> Vec<String> {
        self.shared.registry.kinds()
    }

    /// Queue a job and return its task id
    pub fn submit(&self, kind: &str, args: serde_json::Value) -> Result<String> {
        let job = self.shared.registry.get(kind).ok_or_else(|| {
            FleetError::validation_field(format!("Unknown job type '{}'", kind), "type")
        })?;
        job.validate_args(&args)?;

        let task_id = uuid::Uuid::new_v4().to_string();
        self.shared.tasks.insert(
            task_id.clone(),
            TaskRecord {
                kind: kind.to_string(),
                state: TaskState::Pending,
                cancel: CancellationToken::new(),
                result: None,
                submitted_at: Utc::now(),
                finished_at: None,
                observed: false,
            },
        );

        let queued = QueuedTask { task_id: task_id.clone(), job, args };
        if let Err(e) = self.sender.try_send(queued) {
            self.shared.tasks.remove(&task_id);
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => {
                    FleetError::conflict("Job queue is full", "Task")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    FleetError::internal("Job executor is shut down")
                }
            });
        }

        metrics::record_job_submitted(kind);
        info!(task_id = %task_id, kind, "Job submitted");
        Ok(task_id)
    }

    pub fn state(&self, task_id: &str) -> Option<TaskState> {
        self.shared.tasks.get(task_id).map(|t| t.state)
    }

    /// Number of tracked tasks, finished ones included
    pub fn task_count(&self) -> usize {
        self.shared.tasks.len()
    }

    /// Current state plus every log entry so far. The stored log is purged
    /// the first time a terminal state is returned.
    pub async fn get_log(&self, task_id: &str) -> Result<TaskLogView> {
        let snapshot = self
            .shared
            .tasks
            .get(task_id)
            .map(|t| t.clone())
            .ok_or_else(|| FleetError::not_found("Task", task_id))?;

        let messages = if snapshot.observed {
            Vec::new()
        } else {
            self.shared.log_store.read_all(task_id).await?
        };

        if snapshot.state.is_terminal() && !snapshot.observed {
            if let Some(mut record) = self.shared.tasks.get_mut(task_id) {
                record.observed = true;
            }
            self.shared.log_store.purge(task_id).await?;
            debug!(task_id, "Purged task log after terminal observation");
        }

        Ok(TaskLogView {
            task_id: task_id.to_string(),
            kind: snapshot.kind,
            state: snapshot.state,
            result: snapshot.result,
            submitted_at: snapshot.submitted_at,
            finished_at: snapshot.finished_at,
            messages,
        })
    }

    /// Read a finished task's log and forget the task. A task that is still
    /// running is returned as-is and stays tracked.
    pub async fn take_log(&self, task_id: &str) -> Result<TaskLogView> {
        let view = self.get_log(task_id).await?;
        if view.state.is_terminal() {
            self.shared.tasks.remove(task_id);
        }
        Ok(view)
    }

    /// Drop tasks that finished at least `older_than` ago, purging any log
    /// nobody read. Returns how many were dropped.
    pub async fn evict_finished(&self, older_than: Duration) -> Result<usize> {
        let cutoff = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let Some(cutoff) = cutoff else {
            return Ok(0);
        };
        let expired: Vec<(String, bool)> = self
            .shared
            .tasks
            .iter()
            .filter(|t| t.finished_at.is_some_and(|at| at <= cutoff))
            .map(|t| (t.key().clone(), t.observed))
            .collect();

        for (task_id, observed) in &expired {
            if !observed {
                self.shared.log_store.purge(task_id).await?;
            }
            self.shared.tasks.remove(task_id);
        }
        if !expired.is_empty() {
            debug!(evicted = expired.len(), "Evicted finished tasks");
        }
        Ok(expired.len())
    }

    /// Request cancellation. Jobs stop at their next step boundary; a pending
    /// job never starts. Returns `false` if the task already finished.
    pub fn cancel(&self, task_id: &str) -> Result<bool> {
        let record =
            self.shared.tasks.get(task_id).ok_or_else(|| FleetError::not_found("Task", task_id))?;
        if record.state.is_terminal() {
            return Ok(false);
        }
        record.cancel.cancel();
        info!(task_id, "Cancellation requested");
        Ok(true)
    }
}

async fn execute(shared: &Shared, task: QueuedTask) {
    let QueuedTask { task_id, job, args } = task;
    let kind = job.kind().to_string();

    let cancel = match shared.tasks.get_mut(&task_id) {
        Some(mut record) => {
            record.state = TaskState::Running;
            record.cancel.clone()
        }
        None => return,
    };

    let logger = TaskLogger::new(Arc::clone(&shared.log_store), task_id.clone());
    let started = Instant::now();
    let span = job_span!(kind, task_id);

    let (state, result) = async {
        if cancel.is_cancelled() {
            logger.warning("Task cancelled before it started").await;
            return (TaskState::Failure, None);
        }

        let ctx = JobContext::new(logger.clone(), cancel);
        let run = tokio::spawn(async move { job.run(ctx, args).await }.in_current_span());

        match run.await {
            Ok(Ok(outcome)) => finish(outcome),
            Ok(Err(FleetError::Cancelled { .. })) => {
                logger.warning("Task cancelled").await;
                (TaskState::Failure, None)
            }
            Ok(Err(e)) => {
                error!(error = %e, "Job failed");
                logger.error(format!("Task failed: {}", e)).await;
                (TaskState::Failure, None)
            }
            Err(join_error) => {
                error!(panicked = join_error.is_panic(), "Job aborted");
                logger.error("Task aborted by an unexpected internal error").await;
                (TaskState::Failure, None)
            }
        }
    }
    .instrument(span)
    .await;

    let elapsed = started.elapsed().as_secs_f64();
    metrics::record_job_completed(&kind, state.as_str(), elapsed);

    if let Some(mut record) = shared.tasks.get_mut(&task_id) {
        record.state = state;
        record.result = result;
        record.finished_at = Some(Utc::now());
    } else {
        warn!(task_id = %task_id, "Task record vanished before completion");
    }
    info!(task_id = %task_id, kind = %kind, state = state.as_str(), elapsed_seconds = elapsed, "Job finished");
}

fn finish(outcome: JobOutcome) -> (TaskState, Option<serde_json::Value>) {
    let state = if outcome.succeeded { TaskState::Success } else { TaskState::Failure };
    let result = if outcome.result.is_null() { None } else { Some(outcome.result) };
    (state, result)
}
