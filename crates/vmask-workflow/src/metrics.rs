//! Workflow metrics.
//!
//! Only records through the `metrics` facade; installing an exporter is up
//! to the embedding binary.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const MASK_REQUESTS_TOTAL: &str = "vmask_mask_requests_total";
    pub const INTENT_REQUESTS_TOTAL: &str = "vmask_intent_requests_total";
    pub const TASKS_SUBMITTED_TOTAL: &str = "vmask_tasks_submitted_total";
    pub const POLL_TICKS_TOTAL: &str = "vmask_poll_ticks_total";
    pub const TASKS_TERMINAL_TOTAL: &str = "vmask_tasks_terminal_total";
    pub const STALE_RESPONSES_TOTAL: &str = "vmask_stale_responses_total";
}

/// Record a mask request; `kind` is `preview`, `refine` or `full`.
pub fn record_mask_request(kind: &str, success: bool) {
    let labels = [
        ("kind", kind.to_string()),
        ("outcome", outcome(success).to_string()),
    ];
    counter!(names::MASK_REQUESTS_TOTAL, &labels).increment(1);
}

pub fn record_intent_request(success: bool) {
    let labels = [("outcome", outcome(success).to_string())];
    counter!(names::INTENT_REQUESTS_TOTAL, &labels).increment(1);
}

pub fn record_task_submitted(action: &str, success: bool) {
    let labels = [
        ("action", action.to_string()),
        ("outcome", outcome(success).to_string()),
    ];
    counter!(names::TASKS_SUBMITTED_TOTAL, &labels).increment(1);
}

pub fn record_poll_tick(success: bool) {
    let labels = [("outcome", outcome(success).to_string())];
    counter!(names::POLL_TICKS_TOTAL, &labels).increment(1);
}

/// Record a terminal task outcome (`succeeded`, `failed`, `cancelled`, `poll_failed`).
pub fn record_task_terminal(outcome: &str) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::TASKS_TERMINAL_TOTAL, &labels).increment(1);
}

/// A response arrived for a session that was already closed.
pub fn record_stale_response(kind: &str) {
    let labels = [("kind", kind.to_string())];
    counter!(names::STALE_RESPONSES_TOTAL, &labels).increment(1);
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "error"
    }
}
