//! Structured session logging.
//!
//! Provides consistent, structured logging for selection sessions with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmask_models::{ObjectAction, SessionId, TaskId, WorkflowStage};

const DEFAULT_FILTER: &str = "info,vmask_workflow=info,vmask_client=info,vmask_media=info";

/// Initialize tracing with colored output for dev, JSON when `LOG_FORMAT=json`.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let result = if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Session logger for structured logging with consistent formatting.
///
/// Every line carries the session ID and asset ID so one selection session
/// can be followed across preview, confirmation and polling.
#[derive(Debug, Clone)]
pub struct SessionLogger {
    session_id: String,
    asset_id: String,
}

impl SessionLogger {
    pub fn new(session_id: &SessionId, asset_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            asset_id: asset_id.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            session_id = %self.session_id,
            asset_id = %self.asset_id,
            "Session started: {}", message
        );
    }

    pub fn log_task_submitted(&self, task_id: &TaskId, action: ObjectAction) {
        info!(
            session_id = %self.session_id,
            asset_id = %self.asset_id,
            task_id = %task_id,
            action = %action,
            "Task submitted"
        );
    }

    pub fn log_transition(&self, from: WorkflowStage, to: WorkflowStage) {
        info!(
            session_id = %self.session_id,
            asset_id = %self.asset_id,
            from = %from,
            to = %to,
            "Session stage changed"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            session_id = %self.session_id,
            asset_id = %self.asset_id,
            "Session warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            session_id = %self.session_id,
            asset_id = %self.asset_id,
            "Session error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            session_id = %self.session_id,
            asset_id = %self.asset_id,
            "Session completed: {}", message
        );
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    /// Create a tracing span for this session.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "session",
            session_id = %self.session_id,
            asset_id = %self.asset_id
        )
    }
}
