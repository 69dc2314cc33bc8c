//! Workflow configuration.

use std::time::Duration;

/// Workflow configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Delay between task status polls
    pub poll_interval: Duration,
    /// Give up polling after this long; reported as a poll failure
    pub poll_timeout: Duration,
    /// Undo stack capacity
    pub history_capacity: usize,
    /// Max distance (source px) for a click to hit an existing prompt point
    pub click_tolerance_px: f64,
    /// Interior samples closer than this (raster px) to an exclusion click are dropped
    pub exclusion_radius_px: f64,
    /// Include points retained when an exclusion lands inside the mask
    pub max_retained_samples: usize,
    /// Intent results below this confidence ask for clarification
    pub min_confidence: f64,
    /// Mask rasters kept decoded
    pub raster_cache_capacity: usize,
    /// Work directory for decoded mask rasters
    pub work_dir: String,
    /// Capacity of the workflow event channel
    pub event_capacity: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(3600), // 1 hour
            history_capacity: 100,
            click_tolerance_px: 20.0,
            exclusion_radius_px: 100.0,
            max_retained_samples: 3,
            min_confidence: 0.0,
            raster_cache_capacity: 8,
            work_dir: "/tmp/vmask".to_string(),
            event_capacity: 256,
        }
    }
}

impl WorkflowConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            poll_interval: Duration::from_millis(
                env_parse("WORKFLOW_POLL_INTERVAL_MS").unwrap_or(1000),
            ),
            poll_timeout: Duration::from_secs(env_parse("WORKFLOW_POLL_TIMEOUT").unwrap_or(3600)),
            history_capacity: env_parse("WORKFLOW_HISTORY_CAPACITY")
                .unwrap_or(defaults.history_capacity),
            click_tolerance_px: env_parse("WORKFLOW_CLICK_TOLERANCE_PX")
                .unwrap_or(defaults.click_tolerance_px),
            exclusion_radius_px: env_parse("WORKFLOW_EXCLUSION_RADIUS_PX")
                .unwrap_or(defaults.exclusion_radius_px),
            max_retained_samples: env_parse("WORKFLOW_MAX_RETAINED_SAMPLES")
                .unwrap_or(defaults.max_retained_samples),
            min_confidence: env_parse::<f64>("WORKFLOW_MIN_CONFIDENCE")
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(defaults.min_confidence),
            raster_cache_capacity: env_parse("WORKFLOW_RASTER_CACHE")
                .unwrap_or(defaults.raster_cache_capacity),
            work_dir: std::env::var("WORKFLOW_WORK_DIR").unwrap_or(defaults.work_dir),
            event_capacity: env_parse("WORKFLOW_EVENT_CAPACITY").unwrap_or(defaults.event_capacity),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkflowConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.history_capacity, 100);
        assert_eq!(config.min_confidence, 0.0);
    }
}
