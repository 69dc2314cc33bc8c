//! Shared data models for the object-selection mask workflow.
//!
//! This crate provides Serde-serializable types for:
//! - Click points, visual prompt points and generated masks
//! - The selection state snapshot that undo/redo operates on
//! - Structured decisions returned by the intent service
//! - Background task progress
//! - Workflow events consumed by UI clients

pub mod conversation;
pub mod event;
pub mod frame;
pub mod geometry;
pub mod ids;
pub mod selection;
pub mod task;

// Re-export common types
pub use conversation::ConversationResult;
pub use event::{WorkflowEvent, WorkflowStage};
pub use frame::{midpoint_index, SampledFrame};
pub use geometry::{NormalizedPoint, PixelPoint, Resolution};
pub use ids::{AssetId, ClickPointId, PromptPointId, SessionId, TaskId};
pub use selection::{
    ClickPoint, MaskData, MaskOperationKind, ObjectAction, PendingMaskOperation, PointLabel,
    SelectionState, VisualPromptPoint,
};
pub use task::{TaskProgress, TaskStatus, TaskUpdate};
