//! Point-based mask refinement.
//!
//! A refinement click is first classified against the current mask into a
//! [`PendingMaskOperation`], then materialized into visual prompt points.
//! All pixel coordinates here are in mask source resolution.

use vmask_media::{find_nearest_point, normalize};
use vmask_models::{
    MaskOperationKind, PendingMaskOperation, PixelPoint, PointLabel, PromptPointId, Resolution,
    VisualPromptPoint,
};

/// Classify a click against the current mask and its prompt points.
#[allow(clippy::too_many_arguments)]
pub fn plan_operation(
    kind: MaskOperationKind,
    click: PixelPoint,
    source: Resolution,
    inside_mask: bool,
    points: &[VisualPromptPoint],
    tolerance: f64,
    frame_index: usize,
    timestamp_seconds: f64,
) -> PendingMaskOperation {
    let target_point = find_nearest_point(click, points, tolerance, VisualPromptPoint::pixel).cloned();
    PendingMaskOperation {
        kind,
        click_pixel: click,
        click_norm: normalize(click, source),
        target_point,
        is_inside_existing_mask: inside_mask,
        frame_index,
        timestamp_seconds,
    }
}

/// An exclusion inside the mask that does not just drop an include point
/// needs interior samples to keep the other selected instances.
pub fn needs_interior_samples(op: &PendingMaskOperation) -> bool {
    op.kind == MaskOperationKind::Remove
        && op.is_inside_existing_mask
        && !targets_label(op, PointLabel::Include)
}

/// Materialize an operation into the new prompt point list.
///
/// `retained` are interior points (source pixels) to keep as includes;
/// only used for exclusions.
pub fn apply_operation(
    points: &[VisualPromptPoint],
    op: &PendingMaskOperation,
    source: Resolution,
    retained: &[PixelPoint],
    text_prompt: Option<&str>,
) -> Vec<VisualPromptPoint> {
    let target_id = op.target_point.as_ref().map(|p| &p.id);
    let mut next: Vec<VisualPromptPoint> = points.to_vec();
    let make = |pixel: PixelPoint, label: PointLabel| VisualPromptPoint {
        id: PromptPointId::generate(),
        x_pixel: pixel.x,
        y_pixel: pixel.y,
        resolution: source,
        x_norm: normalize(pixel, source).x,
        y_norm: normalize(pixel, source).y,
        label,
        frame_index: op.frame_index,
        timestamp_seconds: op.timestamp_seconds,
        text_prompt: text_prompt.map(str::to_string),
    };

    match op.kind {
        MaskOperationKind::Add => {
            if targets_label(op, PointLabel::Include) {
                return next;
            }
            // an add on an exclusion point flips it
            next.retain(|p| Some(&p.id) != target_id);
            next.push(make(op.click_pixel, PointLabel::Include));
        }
        MaskOperationKind::Remove => {
            if targets_label(op, PointLabel::Include) {
                next.retain(|p| Some(&p.id) != target_id);
                return next;
            }
            if op.target_point.is_none() {
                next.push(make(op.click_pixel, PointLabel::Exclude));
            }
            next.extend(retained.iter().map(|p| make(*p, PointLabel::Include)));
        }
    }
    next
}

fn targets_label(op: &PendingMaskOperation, label: PointLabel) -> bool {
    op.target_point.as_ref().is_some_and(|p| p.label == label)
}
