//! Task log store backed by the `task_logs` table
//!
//! Lets an observer in another process (for example `dirfleet verify`
//! against a running server's database) read the stream.

use super::tasklog::{LogLevel, TaskLogEntry, TaskLogStore};
use crate::errors::{FleetError, Result};
use crate::storage::DbPool;
use async_trait::async_trait;
use sqlx::FromRow;

#[derive(Debug, FromRow)]
struct TaskLogRow {
    level: String,
    msg: String,
    extras: String,
}

#[derive(Debug, Clone)]
pub struct SqlTaskLogStore {
    pool: DbPool,
}

impl SqlTaskLogStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskLogStore for SqlTaskLogStore {
    async fn append(&self, task_id: &str, entry: &TaskLogEntry) -> Result<()> {
        let extras = serde_json::to_string(&entry.extras)?;
        sqlx::query("INSERT INTO task_logs (task_id, level, msg, extras) VALUES ($1, $2, $3, $4)")
            .bind(task_id)
            .bind(entry.level.as_str())
            .bind(&entry.msg)
            .bind(extras)
            .execute(&self.pool)
            .await
            .map_err(|e| FleetError::database(e, format!("Failed to append log for task {}", task_id)))?;
        Ok(())
    }

    async fn read_all(&self, task_id: &str) -> Result<Vec<TaskLogEntry>> {
        let rows = sqlx::query_as::<_, TaskLogRow>(
            "SELECT level, msg, extras FROM task_logs WHERE task_id = $1 ORDER BY id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FleetError::database(e, format!("Failed to read log for task {}", task_id)))?;

        rows.into_iter()
            .map(|row| {
                Ok(TaskLogEntry {
                    level: row.level.parse::<LogLevel>().map_err(FleetError::internal)?,
                    msg: row.msg,
                    extras: serde_json::from_str(&row.extras)?,
                })
            })
            .collect()
    }

    async fn purge(&self, task_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM task_logs WHERE task_id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await
            .map_err(|e| FleetError::database(e, format!("Failed to purge log for task {}", task_id)))?;
        Ok(())
    }
}
