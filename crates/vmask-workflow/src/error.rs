//! Workflow error types.

use thiserror::Error;

use vmask_client::ClientError;
use vmask_media::MediaError;
use vmask_models::WorkflowStage;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Rejected before any network call.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Mask request failed: {0}")]
    Mask(#[source] ClientError),

    #[error("Task request failed: {0}")]
    Task(#[source] ClientError),

    #[error("Intent request failed: {0}")]
    Intent(#[source] ClientError),

    #[error("Cannot {action} while {stage}")]
    InvalidTransition {
        action: &'static str,
        stage: WorkflowStage,
    },

    #[error("A request is already in flight for this session")]
    Busy,

    /// The session changed while a response was in flight; the response was dropped.
    #[error("Session closed before the response arrived")]
    SessionClosed,

    #[error("Media error: {0}")]
    Media(#[from] MediaError),
}

impl WorkflowError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_transition(action: &'static str, stage: WorkflowStage) -> Self {
        Self::InvalidTransition { action, stage }
    }

    /// The user may retry the same action.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkflowError::Mask(e) | WorkflowError::Task(e) | WorkflowError::Intent(e) => {
                e.is_retryable()
            }
            WorkflowError::Busy => true,
            _ => false,
        }
    }

    /// Rejected synchronously without touching any collaborator.
    pub fn is_validation(&self) -> bool {
        matches!(self, WorkflowError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(WorkflowError::Mask(ClientError::ServiceUnavailable("down".into())).is_retryable());
        assert!(!WorkflowError::Task(ClientError::invalid_request("bad")).is_retryable());
        assert!(!WorkflowError::validation("empty prompt").is_retryable());
        assert!(WorkflowError::Busy.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = WorkflowError::invalid_transition("confirm", WorkflowStage::AwaitingSelection);
        assert_eq!(err.to_string(), "Cannot confirm while awaiting_selection");
    }
}
