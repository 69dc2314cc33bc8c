//! Shared HTTP plumbing for the service clients.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::ServiceConfig;
use crate::error::{ClientError, ClientResult};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct HealthResponse {
    pub status: String,
    pub version: Option<String>,
}

/// Which failures a POST may be sent again after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resend {
    /// Any transport failure. Only for calls without side effects.
    OnTransport,
    /// Only failures where the server cannot have accepted the request.
    OnUndelivered,
}

impl Resend {
    fn allows(self, err: &ClientError) -> bool {
        match self {
            Resend::OnTransport => err.is_retryable(),
            Resend::OnUndelivered => err.is_undelivered(),
        }
    }
}

pub(crate) struct HttpService {
    name: &'static str,
    http: Client,
    config: ServiceConfig,
}

impl HttpService {
    pub fn new(name: &'static str, config: ServiceConfig) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Network)?;
        Ok(Self { name, http, config })
    }

    pub fn url(&self, path: &str) -> ClientResult<Url> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| ClientError::config(format!("invalid path {path}: {e}")))
    }

    /// URL for `collection/{id}` with the id percent-encoded as one segment.
    pub fn resource_url(&self, collection: &str, id: &str) -> ClientResult<Url> {
        let mut url = self.url(collection)?;
        url.path_segments_mut()
            .map_err(|_| ClientError::config("base URL cannot have path segments"))?
            .pop_if_empty()
            .push(id);
        Ok(url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// POST a JSON body and decode a JSON response, retrying transport failures.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        self.post_json_with(path, body, Resend::OnTransport).await
    }

    /// POST that creates something on the server. A timed-out attempt may
    /// already have been accepted, so only undelivered attempts are resent.
    pub async fn post_json_once<B, T>(&self, path: &str, body: &B) -> ClientResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        self.post_json_with(path, body, Resend::OnUndelivered).await
    }

    async fn post_json_with<B, T>(&self, path: &str, body: &B, resend: Resend) -> ClientResult<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(path)?;
        debug!(service = self.name, %url, "POST");

        let response = self
            .with_retry(resend, || {
                let request = self.authorize(self.http.post(url.clone()).json(body));
                async move {
                    let response = request.send().await?;
                    ensure_success(response).await
                }
            })
            .await?;

        decode_json(response).await
    }

    /// GET a JSON resource once, without retries.
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> ClientResult<T> {
        debug!(service = self.name, %url, "GET");
        let response = self.authorize(self.http.get(url)).send().await?;
        let response = ensure_success(response).await?;
        decode_json(response).await
    }

    /// POST a JSON body and hand back the raw response for streaming.
    pub async fn post_streaming<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> ClientResult<Response> {
        let url = self.url(path)?;
        debug!(service = self.name, %url, "POST (streaming)");
        let response = self
            .authorize(self.http.post(url).json(body))
            .send()
            .await?;
        ensure_success(response).await
    }

    /// Check if the service is healthy.
    pub async fn health_check(&self) -> ClientResult<bool> {
        let url = self.url("health")?;

        match self.http.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("{} health check failed: {}", self.name, response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("{} health check error: {}", self.name, e);
                Ok(false)
            }
        }
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, resend: Resend, operation: F) -> ClientResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ClientResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if resend.allows(&e) && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "{} request failed (attempt {}), retrying in {:?}: {}",
                        self.name,
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn ensure_success(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status.as_u16() == 503 {
        return Err(ClientError::ServiceUnavailable(body));
    }
    Err(ClientError::RequestFailed {
        status: status.as_u16(),
        body,
    })
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> ClientResult<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ClientError::invalid_response(format!(
            "{e}: {}",
            String::from_utf8_lossy(&bytes[..bytes.len().min(200)])
        ))
    })
}
