//! Task service that runs jobs in-process against a [`TaskRepository`].
//!
//! Each status call advances the job by a fixed step. Used for local runs
//! and tests where no real task service is deployed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use vmask_models::{TaskId, TaskProgress, TaskStatus, TaskUpdate};

use crate::error::{ClientError, ClientResult};
use crate::repository::TaskRepository;
use crate::task::{TaskReceipt, TaskService, TaskSubmission};

pub struct SimulatedTaskService {
    repo: Arc<dyn TaskRepository>,
    step: u8,
    output_base: String,
    fail_with: Option<String>,
}

impl SimulatedTaskService {
    pub fn new(repo: Arc<dyn TaskRepository>) -> Self {
        Self {
            repo,
            step: 25,
            output_base: "memory://outputs".to_string(),
            fail_with: None,
        }
    }

    /// Percentage added per status call, at least 1.
    pub fn with_step(mut self, step: u8) -> Self {
        self.step = step.max(1);
        self
    }

    pub fn with_output_base(mut self, base: impl Into<String>) -> Self {
        self.output_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Finish every job as failed with this message instead of succeeding.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }
}

#[async_trait]
impl TaskService for SimulatedTaskService {
    async fn submit(&self, submission: &TaskSubmission) -> ClientResult<TaskReceipt> {
        submission.validate()?;
        let task_id = TaskId::from_string(uuid::Uuid::new_v4().to_string());
        self.repo.insert(TaskProgress::new(task_id.clone())).await;
        info!(task_id = %task_id, asset_id = %submission.asset_id, "Simulated task accepted");
        Ok(TaskReceipt {
            task_id,
            status: TaskStatus::Starting,
        })
    }

    async fn status(&self, task_id: &TaskId) -> ClientResult<TaskUpdate> {
        let current = self
            .repo
            .get(task_id)
            .await
            .ok_or_else(|| ClientError::TaskNotFound(task_id.to_string()))?;

        let update = if current.is_terminal() {
            TaskUpdate {
                status: current.status,
                percentage: f64::from(current.percentage),
                output_url: current.output_url.clone(),
                error: current.error.clone(),
            }
        } else {
            let next = current.percentage.saturating_add(self.step).min(100);
            match (next, &self.fail_with) {
                (100, Some(message)) => TaskUpdate::failed(message.clone()),
                (100, None) => {
                    TaskUpdate::succeeded(format!("{}/{}.mp4", self.output_base, task_id))
                }
                _ => TaskUpdate::new(TaskStatus::Processing, f64::from(next)),
            }
        };

        self.repo.apply(task_id, &update).await?;
        Ok(update)
    }
}
