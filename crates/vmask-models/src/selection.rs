//! Selection session model: clicks, visual prompt points, masks.
//!
//! [`SelectionState`] is the single source of truth for one selection
//! session. It is a plain value so that undo/redo can keep deep snapshots
//! of it and compare them for equality.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::geometry::{NormalizedPoint, PixelPoint, Resolution};
use crate::ids::{ClickPointId, PromptPointId};

/// One user click on a specific sampled frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClickPoint {
    pub id: ClickPointId,
    pub frame_index: usize,
    pub timestamp_seconds: f64,
    /// X in frame pixels
    pub x: f64,
    /// Y in frame pixels
    pub y: f64,
    /// Image of the frame the click was made on
    pub frame_image_ref: String,
}

impl ClickPoint {
    /// Create a click point with a fresh ID.
    pub fn new(
        frame_index: usize,
        timestamp_seconds: f64,
        x: f64,
        y: f64,
        frame_image_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: ClickPointId::generate(),
            frame_index,
            timestamp_seconds,
            x,
            y,
            frame_image_ref: frame_image_ref.into(),
        }
    }

    pub fn pixel(&self) -> PixelPoint {
        PixelPoint::new(self.x, self.y)
    }
}

/// Label of a visual prompt point (wire values `0` and `1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PointLabel {
    /// Exclude this region from the mask
    Exclude,
    /// Include this region in the mask
    Include,
}

impl From<PointLabel> for u8 {
    fn from(label: PointLabel) -> Self {
        match label {
            PointLabel::Exclude => 0,
            PointLabel::Include => 1,
        }
    }
}

impl TryFrom<u8> for PointLabel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PointLabel::Exclude),
            1 => Ok(PointLabel::Include),
            other => Err(format!("invalid point label {other}, expected 0 or 1")),
        }
    }
}

/// A labeled coordinate fed to the segmentation model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VisualPromptPoint {
    pub id: PromptPointId,
    pub x_pixel: f64,
    pub y_pixel: f64,
    /// Resolution the pixel coordinates were computed against
    pub resolution: Resolution,
    pub x_norm: f64,
    pub y_norm: f64,
    #[schemars(with = "u8")]
    pub label: PointLabel,
    pub frame_index: usize,
    pub timestamp_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_prompt: Option<String>,
}

impl VisualPromptPoint {
    pub fn pixel(&self) -> PixelPoint {
        PixelPoint::new(self.x_pixel, self.y_pixel)
    }

    pub fn normalized(&self) -> NormalizedPoint {
        NormalizedPoint::new(self.x_norm, self.y_norm)
    }

    pub fn is_include(&self) -> bool {
        self.label == PointLabel::Include
    }
}

/// One generated mask, preview-resolution or full-video.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MaskData {
    /// Displayable mask raster (URL, path or data URL)
    pub preview_image: String,
    /// Whether `preview_image` is a video rather than a still image
    #[serde(default)]
    pub preview_is_video: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub visual_prompt_points: Vec<VisualPromptPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    /// Frame the preview was generated against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<usize>,
    /// Width of the frame the mask overlays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_width: Option<u32>,
    /// Height of the frame the mask overlays
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_height: Option<u32>,
}

impl MaskData {
    /// Resolution of the frame the mask overlays, required for hit-testing.
    pub fn source_resolution(&self) -> Option<Resolution> {
        match (self.source_width, self.source_height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some(Resolution::new(w, h)),
            _ => None,
        }
    }

    /// Reference to hand to downstream jobs: the mask reference if the
    /// service returned one, else the preview itself.
    pub fn effective_reference(&self) -> &str {
        self.mask_reference.as_deref().unwrap_or(&self.preview_image)
    }
}

/// What a pending refinement click should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MaskOperationKind {
    Add,
    Remove,
}

/// A refinement click awaiting classification against the current mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PendingMaskOperation {
    pub kind: MaskOperationKind,
    /// Click in mask source pixels
    pub click_pixel: PixelPoint,
    pub click_norm: NormalizedPoint,
    /// Existing prompt point within tolerance of the click
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_point: Option<VisualPromptPoint>,
    pub is_inside_existing_mask: bool,
    pub frame_index: usize,
    pub timestamp_seconds: f64,
}

/// Action to perform on the selected object once the mask is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ObjectAction {
    /// Inpaint the object out of the video
    #[default]
    Remove,
    /// Extract the object from the video
    Extract,
}

impl ObjectAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectAction::Remove => "remove",
            ObjectAction::Extract => "extract",
        }
    }
}

impl std::fmt::Display for ObjectAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Complete selection state of one session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectionState {
    pub click_points: Vec<ClickPoint>,
    pub mask_data: Option<MaskData>,
    pub selected_frame_index: Option<usize>,
    /// Must be a member of `click_points` when set
    pub selected_object: Option<ClickPoint>,
    pub pending_action: Option<ObjectAction>,
    pub pending_mask_operation: Option<PendingMaskOperation>,
    pub is_mask_edit_mode: bool,
}

impl SelectionState {
    /// Find a click point by ID.
    pub fn click_point(&self, id: &ClickPointId) -> Option<&ClickPoint> {
        self.click_points.iter().find(|p| &p.id == id)
    }

    /// Check the selected-object membership invariant.
    pub fn selected_object_is_member(&self) -> bool {
        match &self.selected_object {
            Some(selected) => self.click_points.iter().any(|p| p == selected),
            None => true,
        }
    }

    /// A mask is present and an action is waiting for confirmation.
    pub fn has_pending_preview(&self) -> bool {
        self.mask_data.is_some() && self.pending_action.is_some()
    }
}
