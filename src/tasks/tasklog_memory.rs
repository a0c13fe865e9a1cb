//! In-process task log store

use super::tasklog::{TaskLogEntry, TaskLogStore};
use crate::errors::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Task logs kept in a `DashMap`, one vector per task id
#[derive(Debug, Default)]
pub struct MemoryTaskLogStore {
    logs: DashMap<String, Vec<TaskLogEntry>>,
}

impl MemoryTaskLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_count(&self) -> usize {
        self.logs.len()
    }
}

#[async_trait]
impl TaskLogStore for MemoryTaskLogStore {
    async fn append(&self, task_id: &str, entry: &TaskLogEntry) -> Result<()> {
        self.logs.entry(task_id.to_string()).or_default().push(entry.clone());
        Ok(())
    }

    async fn read_all(&self, task_id: &str) -> Result<Vec<TaskLogEntry>> {
        Ok(self.logs.get(task_id).map(|entries| entries.clone()).unwrap_or_default())
    }

    async fn purge(&self, task_id: &str) -> Result<()> {
        self.logs.remove(task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::tasklog::LogLevel;

    #[tokio::test]
    async fn purge_removes_only_that_task() {
        let store = MemoryTaskLogStore::new();
        store.append("a", &TaskLogEntry::new(LogLevel::Info, "x")).await.unwrap();
        store.append("b", &TaskLogEntry::new(LogLevel::Info, "y")).await.unwrap();
        store.purge("a").await.unwrap();

        assert!(store.read_all("a").await.unwrap().is_empty());
        assert_eq!(store.read_all("b").await.unwrap().len(), 1);
        assert_eq!(store.task_count(), 1);
    }
}
