//! Sampled still frames.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One still frame captured from the source video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SampledFrame {
    /// Ordinal position within the sampler's output sequence
    pub index: usize,
    /// Presentation time the frame was captured at
    pub timestamp_seconds: f64,
    /// Where the captured image lives (file path, URL or data URL)
    pub image_ref: String,
}

/// Index of the frame in the middle of a sampled sequence.
///
/// Returns `None` for an empty sequence.
pub fn midpoint_index(frames: &[SampledFrame]) -> Option<usize> {
    if frames.is_empty() {
        return None;
    }
    Some(frames[frames.len() / 2].index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<SampledFrame> {
        (0..n)
            .map(|i| SampledFrame {
                index: i,
                timestamp_seconds: i as f64 * 0.2,
                image_ref: format!("frame_{i}.jpg"),
            })
            .collect()
    }

    #[test]
    fn test_midpoint_index() {
        assert_eq!(midpoint_index(&[]), None);
        assert_eq!(midpoint_index(&frames(1)), Some(0));
        assert_eq!(midpoint_index(&frames(10)), Some(5));
        assert_eq!(midpoint_index(&frames(11)), Some(5));
    }
}
