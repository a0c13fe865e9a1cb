//! # Background Tasks
//!
//! Job contract, worker-pool executor and the per-task log stream observers
//! poll while a job runs.

pub mod executor;
pub mod job;
pub mod tasklog;
pub mod tasklog_memory;
pub mod tasklog_sql;

pub use executor::{Executor, ExecutorHandle, TaskLogView, TaskState};
pub use job::{flag_arg, id_arg, Job, JobContext, JobKind, JobOutcome, JobRegistry};
pub use tasklog::{LogLevel, TaskLogEntry, TaskLogStore, TaskLogger};
pub use tasklog_memory::MemoryTaskLogStore;
pub use tasklog_sql::SqlTaskLogStore;
