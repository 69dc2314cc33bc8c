//! Workflow state and the selection-session context it runs against.

use std::path::Path;

use serde::{Deserialize, Serialize};

use vmask_media::{FrameSampler, FrameSamplerConfig};
use vmask_models::{AssetId, Resolution, SampledFrame, TaskId, WorkflowStage};

use crate::error::{WorkflowError, WorkflowResult};

/// Why a tracked task ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskFailure {
    /// The job itself reported failure. Not retried.
    Job { message: String },
    /// The status endpoint failed or polling timed out. Polling can be resumed.
    PollTransport { message: String },
}

impl TaskFailure {
    pub fn message(&self) -> &str {
        match self {
            TaskFailure::Job { message } | TaskFailure::PollTransport { message } => message,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskFailure::PollTransport { .. })
    }
}

/// Current state of the mask confirmation workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    AwaitingSelection,
    PreviewGenerating { frame_index: usize },
    AwaitingConfirmation,
    FullMaskGenerating,
    TaskSubmitted { task_id: TaskId },
    Polling { task_id: TaskId },
    Completed { task_id: TaskId, output_url: String },
    Failed { task_id: TaskId, failure: TaskFailure },
    Cancelled { task_id: TaskId },
}

impl WorkflowState {
    pub fn stage(&self) -> WorkflowStage {
        match self {
            WorkflowState::Idle => WorkflowStage::Idle,
            WorkflowState::AwaitingSelection => WorkflowStage::AwaitingSelection,
            WorkflowState::PreviewGenerating { .. } => WorkflowStage::PreviewGenerating,
            WorkflowState::AwaitingConfirmation => WorkflowStage::AwaitingConfirmation,
            WorkflowState::FullMaskGenerating => WorkflowStage::FullMaskGenerating,
            WorkflowState::TaskSubmitted { .. } => WorkflowStage::TaskSubmitted,
            WorkflowState::Polling { .. } => WorkflowStage::Polling,
            WorkflowState::Completed { .. } => WorkflowStage::Completed,
            WorkflowState::Failed { .. } => WorkflowStage::Failed,
            WorkflowState::Cancelled { .. } => WorkflowStage::Cancelled,
        }
    }

    /// Task being tracked or last tracked.
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            WorkflowState::TaskSubmitted { task_id }
            | WorkflowState::Polling { task_id }
            | WorkflowState::Completed { task_id, .. }
            | WorkflowState::Failed { task_id, .. }
            | WorkflowState::Cancelled { task_id } => Some(task_id),
            _ => None,
        }
    }

    /// Selection input (frame picks, clicks, queries) is accepted.
    pub fn accepts_selection(&self) -> bool {
        matches!(self, WorkflowState::Idle | WorkflowState::AwaitingSelection)
    }
}

/// The asset a selection session works on.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetContext {
    pub asset_id: AssetId,
    /// Video handed to the mask and task services for full-video work
    pub video_url: String,
    /// Resolution of the sampled frames
    pub source_resolution: Resolution,
    pub frames: Vec<SampledFrame>,
}

impl AssetContext {
    pub fn new(
        asset_id: AssetId,
        video_url: impl Into<String>,
        source_resolution: Resolution,
        frames: Vec<SampledFrame>,
    ) -> Self {
        Self {
            asset_id,
            video_url: video_url.into(),
            source_resolution,
            frames,
        }
    }

    /// Sample frames from a local video and build the context for it.
    pub async fn sample(
        asset_id: AssetId,
        video_path: impl AsRef<Path>,
        video_url: impl Into<String>,
        config: &FrameSamplerConfig,
    ) -> WorkflowResult<Self> {
        let (sampler, info) = FrameSampler::for_video(video_path, config).await?;
        let frames = sampler.collect().await;
        if frames.is_empty() {
            return Err(WorkflowError::validation("no frame could be captured from the video"));
        }
        Ok(Self::new(asset_id, video_url, info.resolution(), frames))
    }

    pub fn frame(&self, index: usize) -> Option<&SampledFrame> {
        self.frames.iter().find(|f| f.index == index)
    }
}
