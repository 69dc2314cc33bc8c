//! Background task service client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use vmask_models::{AssetId, ObjectAction, TaskId, TaskStatus, TaskUpdate};

use crate::config::ServiceConfig;
use crate::error::{ClientError, ClientResult};
use crate::http::HttpService;

/// Full-video job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    pub asset_id: AssetId,
    pub action: ObjectAction,
    pub mask_reference: String,
    pub text_prompt: String,
    pub video_url: String,
}

impl TaskSubmission {
    pub fn validate(&self) -> ClientResult<()> {
        if self.mask_reference.trim().is_empty() {
            return Err(ClientError::invalid_request("task submission without a mask reference"));
        }
        if self.video_url.trim().is_empty() {
            return Err(ClientError::invalid_request("task submission without a video URL"));
        }
        Ok(())
    }
}

/// Task service acknowledgement of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReceipt {
    pub task_id: TaskId,
    #[serde(default)]
    pub status: TaskStatus,
}

/// Background job collaborator.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Submit a full-video job.
    async fn submit(&self, submission: &TaskSubmission) -> ClientResult<TaskReceipt>;

    /// Fetch the current status of a job. Never retried: a failure here is
    /// a transport failure the caller must surface.
    async fn status(&self, task_id: &TaskId) -> ClientResult<TaskUpdate>;
}

/// HTTP client for the task service.
pub struct HttpTaskService {
    service: HttpService,
}

impl HttpTaskService {
    pub fn new(config: ServiceConfig) -> ClientResult<Self> {
        Ok(Self {
            service: HttpService::new("task-service", config)?,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> ClientResult<Self> {
        Self::new(ServiceConfig::task_from_env()?)
    }

    /// Check if the task service is healthy.
    pub async fn health_check(&self) -> ClientResult<bool> {
        self.service.health_check().await
    }
}

#[async_trait]
impl TaskService for HttpTaskService {
    async fn submit(&self, submission: &TaskSubmission) -> ClientResult<TaskReceipt> {
        submission.validate()?;
        let receipt: TaskReceipt = self.service.post_json_once("tasks", submission).await?;
        if receipt.task_id.as_str().is_empty() {
            return Err(ClientError::invalid_response("task service returned an empty task id"));
        }
        info!(task_id = %receipt.task_id, action = %submission.action, "Task submitted");
        Ok(receipt)
    }

    async fn status(&self, task_id: &TaskId) -> ClientResult<TaskUpdate> {
        let url = self.service.resource_url("tasks", task_id.as_str())?;
        self.service.get_json(url).await
    }
}
