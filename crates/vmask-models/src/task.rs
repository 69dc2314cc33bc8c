//! Background task progress.
//!
//! A [`TaskProgress`] is created when a full-video job is submitted and is
//! updated from status polls until it reaches a terminal status. Once
//! terminal it never changes again.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

/// Task processing status as reported by the task service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Job accepted, not yet running
    #[default]
    Starting,
    /// Job is running
    Processing,
    /// Job finished and produced an output
    Succeeded,
    /// Job finished with an error
    Failed,
    /// Job was cancelled
    Cancelled,
}

impl TaskStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Starting => "starting",
            TaskStatus::Processing => "processing",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One status observation returned by the task service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub status: TaskStatus,
    /// Reported progress; services may send fractional values
    #[serde(default)]
    pub percentage: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn new(status: TaskStatus, percentage: f64) -> Self {
        Self {
            status,
            percentage,
            output_url: None,
            error: None,
        }
    }

    pub fn succeeded(output_url: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Succeeded,
            percentage: 100.0,
            output_url: Some(output_url.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            percentage: 0.0,
            output_url: None,
            error: Some(error.into()),
        }
    }
}

/// Client-side view of a background task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Progress percentage (0-100)
    pub percentage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskProgress {
    /// Create progress for a freshly submitted task.
    pub fn new(task_id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status: TaskStatus::Starting,
            percentage: 0,
            output_url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a status observation.
    ///
    /// Returns `false` and leaves the progress untouched if the task is
    /// already terminal.
    pub fn apply(&mut self, update: &TaskUpdate) -> bool {
        if self.is_terminal() {
            return false;
        }

        self.status = update.status;
        self.percentage = clamp_percentage(update.percentage);
        if update.status == TaskStatus::Succeeded {
            self.percentage = 100;
        }
        if update.output_url.is_some() {
            self.output_url = update.output_url.clone();
        }
        if update.error.is_some() {
            self.error = update.error.clone();
        }
        self.updated_at = Utc::now();
        true
    }
}

fn clamp_percentage(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_progress_creation() {
        let progress = TaskProgress::new(TaskId::from("task-1"));
        assert_eq!(progress.status, TaskStatus::Starting);
        assert_eq!(progress.percentage, 0);
        assert!(!progress.is_terminal());
    }

    #[test]
    fn test_task_progress_transitions() {
        let mut progress = TaskProgress::new(TaskId::from("task-1"));

        assert!(progress.apply(&TaskUpdate::new(TaskStatus::Processing, 42.4)));
        assert_eq!(progress.status, TaskStatus::Processing);
        assert_eq!(progress.percentage, 42);

        assert!(progress.apply(&TaskUpdate::succeeded("https://x/out.mp4")));
        assert_eq!(progress.percentage, 100);
        assert_eq!(progress.output_url.as_deref(), Some("https://x/out.mp4"));
        assert!(progress.is_terminal());
    }

    #[test]
    fn test_terminal_progress_is_frozen() {
        let mut progress = TaskProgress::new(TaskId::from("task-1"));
        assert!(progress.apply(&TaskUpdate::failed("out of memory")));

        let before = progress.clone();
        assert!(!progress.apply(&TaskUpdate::succeeded("https://x/out.mp4")));
        assert_eq!(progress, before);
    }

    #[test]
    fn test_percentage_is_clamped() {
        let mut progress = TaskProgress::new(TaskId::from("task-1"));
        progress.apply(&TaskUpdate::new(TaskStatus::Processing, 250.0));
        assert_eq!(progress.percentage, 100);
        progress.apply(&TaskUpdate::new(TaskStatus::Processing, -3.0));
        assert_eq!(progress.percentage, 0);
        progress.apply(&TaskUpdate::new(TaskStatus::Processing, f64::NAN));
        assert_eq!(progress.percentage, 0);
    }

    #[test]
    fn test_status_wire_names() {
        let update: TaskUpdate =
            serde_json::from_str(r#"{"status":"cancelled","percentage":12.5}"#).unwrap();
        assert_eq!(update.status, TaskStatus::Cancelled);
        assert!(update.status.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }
}
