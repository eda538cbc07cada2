use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::task::{Task, TaskId, TaskStatus};
use crate::errors::PipelineError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("task store unavailable: {0}")]
    Unavailable(String),
    #[error("stored task could not be decoded: {0}")]
    Decode(String),
}

impl From<StoreError> for PipelineError {
    fn from(value: StoreError) -> Self {
        Self::Store(value.to_string())
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn save(&self, task: &Task) -> Result<(), StoreError>;
    /// Saves `task` only while the stored copy is still in `expected`.
    /// Returns `false` when the task is missing or another writer moved it.
    async fn save_if_status(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> Result<bool, StoreError>;
    async fn load(&self, id: &TaskId) -> Result<Option<Task>, StoreError>;
    /// Tasks in `status`, oldest first.
    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError>;
    async fn list_all(&self) -> Result<Vec<Task>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
    fail_writes: AtomicBool,
}

impl InMemoryTaskStore {
    /// Makes every subsequent `save` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

fn oldest_first(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by(|left, right| {
        left.created_at.cmp(&right.created_at).then_with(|| left.id.cmp(&right.id))
    });
    tasks
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes are disabled".to_string()));
        }
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id.0.clone(), task.clone());
        Ok(())
    }

    async fn save_if_status(
        &self,
        task: &Task,
        expected: TaskStatus,
    ) -> Result<bool, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes are disabled".to_string()));
        }
        let mut tasks = self.tasks.write().await;
        match tasks.get(&task.id.0) {
            Some(stored) if stored.status == expected => {
                tasks.insert(task.id.0.clone(), task.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn load(&self, id: &TaskId) -> Result<Option<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(&id.0).cloned())
    }

    async fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(oldest_first(tasks.values().filter(|task| task.status == status).cloned().collect()))
    }

    async fn list_all(&self) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(oldest_first(tasks.values().cloned().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryTaskStore, StoreError, TaskStore};
    use crate::domain::task::{RequestMetadata, Task, TaskStatus};

    #[tokio::test]
    async fn save_overwrites_and_filters_by_status() {
        let store = InMemoryTaskStore::default();
        let mut first = Task::new("vpn keeps dropping", RequestMetadata::default());
        let second = Task::new("order monitors", RequestMetadata::default());
        store.save(&first).await.expect("save");
        store.save(&second).await.expect("save");

        first.transition_to(TaskStatus::NeedsReview).expect("pending -> needs_review");
        store.save(&first).await.expect("save");

        assert_eq!(store.len().await, 2);
        let review = store.list_by_status(TaskStatus::NeedsReview).await.expect("list");
        assert_eq!(review.len(), 1);
        assert_eq!(review[0].id, first.id);
        assert_eq!(store.load(&second.id).await.expect("load").map(|t| t.status), Some(TaskStatus::Pending));
    }

    #[tokio::test]
    async fn conditional_save_only_applies_from_expected_status() {
        let store = InMemoryTaskStore::default();
        let mut task = Task::new("vpn keeps dropping", RequestMetadata::default());
        assert!(!store.save_if_status(&task, TaskStatus::Pending).await.expect("missing task"));

        task.transition_to(TaskStatus::NeedsReview).expect("pending -> needs_review");
        store.save(&task).await.expect("save");

        let mut assigned = task.clone();
        assigned.transition_to(TaskStatus::Assigned).expect("needs_review -> assigned");
        assert!(store.save_if_status(&assigned, TaskStatus::NeedsReview).await.expect("first"));
        assert!(!store.save_if_status(&assigned, TaskStatus::NeedsReview).await.expect("stale"));
        assert_eq!(
            store.load(&task.id).await.expect("load").map(|t| t.status),
            Some(TaskStatus::Assigned)
        );
    }

    #[tokio::test]
    async fn failing_writes_surface_as_unavailable() {
        let store = InMemoryTaskStore::default();
        store.set_fail_writes(true);
        let task = Task::new("badge not working", RequestMetadata::default());

        assert!(matches!(store.save(&task).await, Err(StoreError::Unavailable(_))));
        assert!(store.is_empty().await);
    }
}
