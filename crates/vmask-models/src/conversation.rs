//! Structured decisions returned by the conversational-intent service.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::selection::ObjectAction;

/// The structured decision the intent service produces for one user turn.
///
/// Field names are the service's wire names.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema, Validate)]
pub struct ConversationResult {
    /// The query was an object-selection request at all
    #[serde(default)]
    pub is_valid_request: bool,
    /// The described object is visible in the current frame
    #[serde(default)]
    pub object_exists: bool,
    /// Prompt to hand to the segmentation model
    #[serde(default)]
    pub text_prompt: String,
    #[serde(default)]
    pub action: ObjectAction,
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub clarification_needed: bool,
    #[serde(default)]
    pub vision_matched: bool,
    #[serde(default)]
    pub reasoning: String,
    /// User-facing reply
    #[serde(default)]
    pub assistant_message: String,
}

impl ConversationResult {
    /// The object exists and no further user turn is needed.
    pub fn is_actionable(&self) -> bool {
        self.is_valid_request && self.object_exists && !self.clarification_needed
    }

    /// Trimmed prompt, `None` if blank.
    pub fn prompt(&self) -> Option<&str> {
        let prompt = self.text_prompt.trim();
        (!prompt.is_empty()).then_some(prompt)
    }
}
