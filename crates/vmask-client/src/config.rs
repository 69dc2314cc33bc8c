//! Collaborator endpoint configuration.

use std::time::Duration;

use url::Url;

use crate::error::{ClientError, ClientResult};

/// Configuration for one collaborator service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL; always ends with `/` so relative paths join beneath it
    pub base_url: Url,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries for retryable failures
    pub max_retries: u32,
    /// Bearer token sent with every request
    pub api_key: Option<String>,
}

impl ServiceConfig {
    /// Create a config with default timeout and retries.
    pub fn new(base_url: &str) -> ClientResult<Self> {
        Ok(Self {
            base_url: parse_base_url(base_url)?,
            timeout: Duration::from_secs(120),
            max_retries: 2,
            api_key: None,
        })
    }

    /// Create config from `{PREFIX}_URL`, `{PREFIX}_TIMEOUT`, `{PREFIX}_RETRIES`
    /// and `{PREFIX}_API_KEY`.
    pub fn from_env(prefix: &str, default_url: &str) -> ClientResult<Self> {
        let base_url =
            std::env::var(format!("{prefix}_URL")).unwrap_or_else(|_| default_url.to_string());
        Ok(Self {
            base_url: parse_base_url(&base_url)?,
            timeout: Duration::from_secs(
                std::env::var(format!("{prefix}_TIMEOUT"))
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(120),
            ),
            max_retries: std::env::var(format!("{prefix}_RETRIES"))
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            api_key: std::env::var(format!("{prefix}_API_KEY"))
                .ok()
                .filter(|s| !s.is_empty()),
        })
    }

    /// Mask service config (`MASK_SERVICE_*`).
    pub fn mask_from_env() -> ClientResult<Self> {
        Self::from_env("MASK_SERVICE", "http://localhost:8010")
    }

    /// Task service config (`TASK_SERVICE_*`).
    pub fn task_from_env() -> ClientResult<Self> {
        Self::from_env("TASK_SERVICE", "http://localhost:8020")
    }

    /// Intent service config (`INTENT_SERVICE_*`).
    pub fn intent_from_env() -> ClientResult<Self> {
        Self::from_env("INTENT_SERVICE", "http://localhost:8030")
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

fn parse_base_url(raw: &str) -> ClientResult<Url> {
    let mut url =
        Url::parse(raw).map_err(|e| ClientError::config(format!("invalid base URL {raw}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ClientError::config(format!("URL {raw} cannot be a base")));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
