//! Client error types.

use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request failed with status {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Service reported an error: {0}")]
    Service(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Transport-level failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::ServiceUnavailable(_) | ClientError::Network(_) => true,
            ClientError::RequestFailed { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// The request never reached a handler that could have acted on it.
    pub fn is_undelivered(&self) -> bool {
        match self {
            ClientError::ServiceUnavailable(_) => true,
            ClientError::Network(e) => e.is_connect(),
            ClientError::RequestFailed { status, .. } => *status == 429 || *status == 503,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::ServiceUnavailable("down".into()).is_retryable());
        assert!(ClientError::RequestFailed { status: 503, body: String::new() }.is_retryable());
        assert!(ClientError::RequestFailed { status: 429, body: String::new() }.is_retryable());
        assert!(!ClientError::RequestFailed { status: 400, body: String::new() }.is_retryable());
        assert!(!ClientError::invalid_response("bad").is_retryable());
        assert!(!ClientError::Service("model crashed".into()).is_retryable());
    }

    #[test]
    fn test_undelivered_classification() {
        assert!(ClientError::ServiceUnavailable("down".into()).is_undelivered());
        assert!(ClientError::RequestFailed { status: 429, body: String::new() }.is_undelivered());
        assert!(!ClientError::RequestFailed { status: 500, body: String::new() }.is_undelivered());
        assert!(!ClientError::RequestFailed { status: 504, body: String::new() }.is_undelivered());
        assert!(!ClientError::invalid_response("bad").is_undelivered());
    }
}
