//! Operation resolver: turns an intent decision into the next workflow step.

use tracing::debug;

use vmask_models::{midpoint_index, ConversationResult, ObjectAction, SampledFrame};

use crate::error::{WorkflowError, WorkflowResult};

const DEFAULT_CLARIFICATION: &str =
    "I couldn't find that object in the frame. Could you describe it differently?";

/// What the workflow should do with an intent decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolveOutcome {
    /// Not an object-selection request; nothing changes.
    Ignored,
    /// Another user turn is needed. Not an error.
    NeedsClarification { message: String },
    /// Request a single-frame preview mask.
    RequestPreview(PreviewPlan),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewPlan {
    pub frame: SampledFrame,
    pub text_prompt: String,
    pub action: ObjectAction,
}

#[derive(Debug, Clone)]
pub struct OperationResolver {
    min_confidence: f64,
}

impl Default for OperationResolver {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl OperationResolver {
    pub fn new(min_confidence: f64) -> Self {
        Self {
            min_confidence: min_confidence.clamp(0.0, 1.0),
        }
    }

    /// Decide what to do with `result`.
    ///
    /// The target frame is the selected frame when there is one, otherwise
    /// the middle of the sampled sequence.
    pub fn resolve(
        &self,
        result: &ConversationResult,
        selected_frame_index: Option<usize>,
        frames: &[SampledFrame],
    ) -> WorkflowResult<ResolveOutcome> {
        if !result.is_valid_request {
            debug!("Intent is not a selection request");
            return Ok(ResolveOutcome::Ignored);
        }

        if !result.object_exists
            || result.clarification_needed
            || result.confidence < self.min_confidence
        {
            return Ok(ResolveOutcome::NeedsClarification {
                message: clarification_message(result),
            });
        }

        let text_prompt = result
            .prompt()
            .ok_or_else(|| WorkflowError::validation("intent result has an empty text prompt"))?
            .to_string();

        let target = selected_frame_index
            .or_else(|| midpoint_index(frames))
            .ok_or_else(|| WorkflowError::validation("no sampled frames to target"))?;
        let frame = frames
            .iter()
            .find(|f| f.index == target)
            .cloned()
            .ok_or_else(|| WorkflowError::validation(format!("frame {target} was not sampled")))?;

        debug!(frame_index = frame.index, prompt = %text_prompt, action = %result.action, "Resolved preview request");
        Ok(ResolveOutcome::RequestPreview(PreviewPlan {
            frame,
            text_prompt,
            action: result.action,
        }))
    }
}

fn clarification_message(result: &ConversationResult) -> String {
    let message = result.assistant_message.trim();
    if message.is_empty() {
        DEFAULT_CLARIFICATION.to_string()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<SampledFrame> {
        (0..n)
            .map(|i| SampledFrame {
                index: i,
                timestamp_seconds: i as f64 * 0.2,
                image_ref: format!("frame_{i:05}.jpg"),
            })
            .collect()
    }

    fn actionable(prompt: &str) -> ConversationResult {
        ConversationResult {
            is_valid_request: true,
            object_exists: true,
            text_prompt: prompt.to_string(),
            action: ObjectAction::Extract,
            confidence: 0.9,
            assistant_message: "Extracting it".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_request_ignored() {
        let result = ConversationResult::default();
        let outcome = OperationResolver::default().resolve(&result, Some(5), &frames(10)).unwrap();
        assert_eq!(outcome, ResolveOutcome::Ignored);
    }

    #[test]
    fn test_clarification() {
        let mut result = actionable("car");
        result.clarification_needed = true;
        result.assistant_message = "Which car?".to_string();
        let outcome = OperationResolver::default().resolve(&result, Some(5), &frames(10)).unwrap();
        assert_eq!(
            outcome,
            ResolveOutcome::NeedsClarification {
                message: "Which car?".to_string()
            }
        );

        let mut missing = actionable("car");
        missing.object_exists = false;
        missing.assistant_message = String::new();
        match OperationResolver::default().resolve(&missing, None, &frames(3)).unwrap() {
            ResolveOutcome::NeedsClarification { message } => {
                assert_eq!(message, DEFAULT_CLARIFICATION)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_selected_frame_wins() {
        let outcome = OperationResolver::default()
            .resolve(&actionable(" red car "), Some(5), &frames(10))
            .unwrap();
        match outcome {
            ResolveOutcome::RequestPreview(plan) => {
                assert_eq!(plan.frame.index, 5);
                assert_eq!(plan.text_prompt, "red car");
                assert_eq!(plan.action, ObjectAction::Extract);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_midpoint_fallback() {
        let outcome = OperationResolver::default()
            .resolve(&actionable("dog"), None, &frames(9))
            .unwrap();
        assert!(matches!(outcome, ResolveOutcome::RequestPreview(plan) if plan.frame.index == 4));
    }

    #[test]
    fn test_validation_errors() {
        let resolver = OperationResolver::default();
        assert!(resolver.resolve(&actionable("  "), Some(1), &frames(3)).unwrap_err().is_validation());
        assert!(resolver.resolve(&actionable("dog"), None, &[]).unwrap_err().is_validation());
        assert!(resolver.resolve(&actionable("dog"), Some(42), &frames(3)).unwrap_err().is_validation());
    }

    #[test]
    fn test_min_confidence_gate() {
        let mut result = actionable("dog");
        result.confidence = 0.4;
        assert!(matches!(
            OperationResolver::default().resolve(&result, Some(0), &frames(2)).unwrap(),
            ResolveOutcome::RequestPreview(_)
        ));
        assert!(matches!(
            OperationResolver::new(0.5).resolve(&result, Some(0), &frames(2)).unwrap(),
            ResolveOutcome::NeedsClarification { .. }
        ));
    }
}
