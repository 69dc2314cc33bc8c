//! Injected storage for task progress.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use vmask_models::{TaskId, TaskProgress, TaskUpdate};

use crate::error::{ClientError, ClientResult};

/// Storage for task progress records.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Store a new record, replacing any existing one for the same task.
    async fn insert(&self, progress: TaskProgress);

    async fn get(&self, task_id: &TaskId) -> Option<TaskProgress>;

    /// Apply a status update and return the stored record.
    ///
    /// Terminal records are frozen: the update is ignored and the stored
    /// record is returned unchanged.
    async fn apply(&self, task_id: &TaskId, update: &TaskUpdate) -> ClientResult<TaskProgress>;
}

/// Default bound on stored records for [`InMemoryTaskRepository`].
pub const DEFAULT_MAX_RECORDS: usize = 1024;

/// Process-local repository.
///
/// Holds at most `max_records` records once settled tasks can be dropped:
/// past the bound, the least recently updated terminal record is evicted.
/// Tasks still in progress are never evicted.
pub struct InMemoryTaskRepository {
    records: RwLock<HashMap<TaskId, TaskProgress>>,
    max_records: usize,
}

impl Default for InMemoryTaskRepository {
    fn default() -> Self {
        Self::with_max_records(DEFAULT_MAX_RECORDS)
    }
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_records(max_records: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            max_records: max_records.max(1),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn insert(&self, progress: TaskProgress) {
        let mut records = self.records.write().await;
        records.insert(progress.task_id.clone(), progress);

        while records.len() > self.max_records {
            let oldest = records
                .values()
                .filter(|p| p.is_terminal())
                .min_by_key(|p| p.updated_at)
                .map(|p| p.task_id.clone());
            match oldest {
                Some(task_id) => {
                    debug!(task_id = %task_id, "Evicting settled task record");
                    records.remove(&task_id);
                }
                None => break,
            }
        }
    }

    async fn get(&self, task_id: &TaskId) -> Option<TaskProgress> {
        self.records.read().await.get(task_id).cloned()
    }

    async fn apply(&self, task_id: &TaskId, update: &TaskUpdate) -> ClientResult<TaskProgress> {
        let mut records = self.records.write().await;
        let progress = records
            .get_mut(task_id)
            .ok_or_else(|| ClientError::TaskNotFound(task_id.to_string()))?;
        if !progress.apply(update) {
            debug!(task_id = %task_id, status = %progress.status, "Ignoring update for settled task");
        }
        Ok(progress.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmask_models::TaskStatus;

    #[tokio::test]
    async fn test_apply_updates_record() {
        let repo = InMemoryTaskRepository::new();
        let task_id = TaskId::from("t-1");
        repo.insert(TaskProgress::new(task_id.clone())).await;

        let progress = repo
            .apply(&task_id, &TaskUpdate::new(TaskStatus::Processing, 42.4))
            .await
            .unwrap();
        assert_eq!(progress.status, TaskStatus::Processing);
        assert_eq!(progress.percentage, 42);
        assert_eq!(repo.get(&task_id).await.unwrap().percentage, 42);
    }

    #[tokio::test]
    async fn test_terminal_record_is_frozen() {
        let repo = InMemoryTaskRepository::new();
        let task_id = TaskId::from("t-1");
        repo.insert(TaskProgress::new(task_id.clone())).await;
        repo.apply(&task_id, &TaskUpdate::succeeded("https://out/1.mp4"))
            .await
            .unwrap();

        let progress = repo
            .apply(&task_id, &TaskUpdate::failed("late failure"))
            .await
            .unwrap();
        assert_eq!(progress.status, TaskStatus::Succeeded);
        assert_eq!(progress.output_url.as_deref(), Some("https://out/1.mp4"));
        assert!(progress.error.is_none());
    }

    #[tokio::test]
    async fn test_settled_records_are_evicted_past_bound() {
        let repo = InMemoryTaskRepository::with_max_records(2);
        let done = TaskId::from("t-done");
        let running = TaskId::from("t-running");
        repo.insert(TaskProgress::new(done.clone())).await;
        repo.insert(TaskProgress::new(running.clone())).await;
        repo.apply(&done, &TaskUpdate::succeeded("https://out/1.mp4"))
            .await
            .unwrap();

        repo.insert(TaskProgress::new(TaskId::from("t-new"))).await;
        assert_eq!(repo.len().await, 2);
        assert!(repo.get(&done).await.is_none());
        assert!(repo.get(&running).await.is_some());

        // nothing settled to drop: active tasks are kept
        repo.insert(TaskProgress::new(TaskId::from("t-extra"))).await;
        assert_eq!(repo.len().await, 3);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let repo = InMemoryTaskRepository::new();
        let err = repo
            .apply(&TaskId::from("missing"), &TaskUpdate::new(TaskStatus::Processing, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::TaskNotFound(_)));
        assert!(repo.is_empty().await);
    }
}
