//! Workflow events pushed to UI clients.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, TaskId};
use crate::selection::{MaskData, ObjectAction};
use crate::task::TaskStatus;

/// Stage of the mask confirmation workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Idle,
    AwaitingSelection,
    PreviewGenerating,
    AwaitingConfirmation,
    FullMaskGenerating,
    TaskSubmitted,
    Polling,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStage::Idle => "idle",
            WorkflowStage::AwaitingSelection => "awaiting_selection",
            WorkflowStage::PreviewGenerating => "preview_generating",
            WorkflowStage::AwaitingConfirmation => "awaiting_confirmation",
            WorkflowStage::FullMaskGenerating => "full_mask_generating",
            WorkflowStage::TaskSubmitted => "task_submitted",
            WorkflowStage::Polling => "polling",
            WorkflowStage::Completed => "completed",
            WorkflowStage::Failed => "failed",
            WorkflowStage::Cancelled => "cancelled",
        }
    }

    /// A network request for this session is outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            WorkflowStage::PreviewGenerating | WorkflowStage::FullMaskGenerating
        )
    }

    /// A background task has been handed to the task service.
    pub fn has_task(&self) -> bool {
        matches!(
            self,
            WorkflowStage::TaskSubmitted
                | WorkflowStage::Polling
                | WorkflowStage::Completed
                | WorkflowStage::Failed
                | WorkflowStage::Cancelled
        )
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event envelope emitted by a selection session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// The workflow moved between stages
    StageChanged {
        #[serde(rename = "sessionId")]
        session_id: SessionId,
        from: WorkflowStage,
        to: WorkflowStage,
    },

    /// Reply text from the intent service
    AssistantMessage { message: String },

    /// The intent service needs another user turn
    ClarificationNeeded { message: String },

    /// A preview mask is ready for confirmation
    PreviewReady {
        mask: MaskData,
        action: ObjectAction,
    },

    /// Full-video job accepted by the task service
    TaskSubmitted {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },

    /// Progress update (0-100)
    TaskProgress {
        #[serde(rename = "taskId")]
        task_id: TaskId,
        status: TaskStatus,
        percentage: u8,
    },

    /// Job finished with an output
    TaskSucceeded {
        #[serde(rename = "taskId")]
        task_id: TaskId,
        #[serde(rename = "outputUrl")]
        output_url: String,
    },

    /// Job reported failure
    TaskFailed {
        #[serde(rename = "taskId")]
        task_id: TaskId,
        message: String,
    },

    /// Job was cancelled, or tracking was abandoned by the user
    TaskCancelled {
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },

    /// The status endpoint itself failed; polling stopped and may be resumed
    PollFailed {
        #[serde(rename = "taskId")]
        task_id: TaskId,
        message: String,
    },

    /// A request failed and the workflow rolled back
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    /// Create an error event.
    pub fn error(message: impl Into<String>) -> Self {
        WorkflowEvent::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Terminal task events are delivered at most once per task.
    pub fn is_task_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::TaskSucceeded { .. }
                | WorkflowEvent::TaskFailed { .. }
                | WorkflowEvent::TaskCancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope() {
        let event = WorkflowEvent::TaskSucceeded {
            task_id: TaskId::from("t1"),
            output_url: "https://x/out.mp4".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "task_succeeded");
        assert_eq!(json["taskId"], "t1");
        assert_eq!(json["outputUrl"], "https://x/out.mp4");
        assert!(event.is_task_terminal());
    }

    #[test]
    fn test_stage_flags() {
        assert!(WorkflowStage::PreviewGenerating.is_busy());
        assert!(!WorkflowStage::AwaitingConfirmation.is_busy());
        assert!(WorkflowStage::Polling.has_task());
        assert_eq!(WorkflowStage::AwaitingSelection.to_string(), "awaiting_selection");
    }
}
