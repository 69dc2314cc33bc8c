//! Segmentation (mask) service client.

use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use vmask_models::VisualPromptPoint;

use crate::config::ServiceConfig;
use crate::error::{ClientError, ClientResult};
use crate::http::HttpService;

/// Request for a mask over one frame or over the whole video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub visual_prompt_points: Vec<VisualPromptPoint>,
    /// Still frame to segment (single-frame requests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_image: Option<String>,
    /// Video to segment (full-video requests)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    pub single_frame: bool,
}

impl MaskRequest {
    /// Preview request against one still frame.
    pub fn for_frame(prompt: impl Into<String>, frame_image: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            visual_prompt_points: Vec::new(),
            frame_image: Some(frame_image.into()),
            video_url: None,
            single_frame: true,
        }
    }

    /// Full-video request.
    pub fn for_video(prompt: impl Into<String>, video_url: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            visual_prompt_points: Vec::new(),
            frame_image: None,
            video_url: Some(video_url.into()),
            single_frame: false,
        }
    }

    pub fn with_negative_prompt(mut self, negative_prompt: Option<String>) -> Self {
        self.negative_prompt = negative_prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn with_points(mut self, points: Vec<VisualPromptPoint>) -> Self {
        self.visual_prompt_points = points;
        self
    }

    /// Reject requests that could never succeed before spending a network call.
    pub fn validate(&self) -> ClientResult<()> {
        if self.prompt.trim().is_empty() && self.visual_prompt_points.is_empty() {
            return Err(ClientError::invalid_request(
                "mask request needs a prompt or visual prompt points",
            ));
        }
        match (self.single_frame, &self.frame_image, &self.video_url) {
            (true, Some(frame), _) if !frame.is_empty() => Ok(()),
            (false, _, Some(video)) if !video.is_empty() => Ok(()),
            (true, _, _) => Err(ClientError::invalid_request(
                "single-frame mask request without a frame image",
            )),
            (false, _, _) => Err(ClientError::invalid_request(
                "full-video mask request without a video URL",
            )),
        }
    }
}

/// Response from the mask service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskResponse {
    /// Preview (single frame) or mask reference (full video)
    pub preview_or_mask_reference: String,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub prediction_id: Option<String>,
}

/// Segmentation collaborator.
#[async_trait]
pub trait MaskService: Send + Sync {
    /// Compute a mask for the request's frame or video.
    async fn generate(&self, request: &MaskRequest) -> ClientResult<MaskResponse>;
}

/// HTTP client for the segmentation service.
pub struct HttpMaskService {
    service: HttpService,
}

impl HttpMaskService {
    pub fn new(config: ServiceConfig) -> ClientResult<Self> {
        Ok(Self {
            service: HttpService::new("mask-service", config)?,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> ClientResult<Self> {
        Self::new(ServiceConfig::mask_from_env()?)
    }

    /// Check if the mask service is healthy.
    pub async fn health_check(&self) -> ClientResult<bool> {
        self.service.health_check().await
    }
}

#[async_trait]
impl MaskService for HttpMaskService {
    async fn generate(&self, request: &MaskRequest) -> ClientResult<MaskResponse> {
        request.validate()?;

        let mut body = request.clone();
        if let Some(frame) = &request.frame_image {
            body.frame_image = Some(inline_frame_image(frame).await?);
        }

        info!(
            single_frame = request.single_frame,
            points = request.visual_prompt_points.len(),
            "Requesting mask"
        );
        let response: MaskResponse = self.service.post_json("masks", &body).await?;
        if response.preview_or_mask_reference.is_empty() {
            return Err(ClientError::invalid_response(
                "mask service returned an empty reference",
            ));
        }
        debug!(prediction_id = ?response.prediction_id, is_video = response.is_video, "Mask ready");
        Ok(response)
    }
}

/// Remote and inline references pass through; local files become data URLs.
pub(crate) async fn inline_frame_image(reference: &str) -> ClientResult<String> {
    if reference.starts_with("http://")
        || reference.starts_with("https://")
        || reference.starts_with("data:")
    {
        return Ok(reference.to_string());
    }
    let bytes = tokio::fs::read(reference).await?;
    Ok(format!(
        "data:{};base64,{}",
        mime_for(Path::new(reference)),
        STANDARD.encode(bytes)
    ))
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}
