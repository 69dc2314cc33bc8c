//! Clients for the external collaborators of the mask workflow.
//!
//! This crate provides:
//! - `MaskService`: segmentation of one frame or a whole video
//! - `TaskService`: background job submission and status polling
//! - `IntentService`: streamed conversational-intent resolution
//! - `TaskRepository`: injected storage for task progress, with an
//!   in-memory implementation and a simulated task service on top of it

pub mod config;
pub mod error;
mod http;
pub mod intent;
pub mod mask;
pub mod repository;
pub mod simulated;
pub mod task;

pub use config::ServiceConfig;
pub use error::{ClientError, ClientResult};
pub use intent::{EnvelopeDecoder, HttpIntentService, IntentEnvelope, IntentReply, IntentRequest, IntentService};
pub use mask::{HttpMaskService, MaskRequest, MaskResponse, MaskService};
pub use repository::{InMemoryTaskRepository, TaskRepository};
pub use simulated::SimulatedTaskService;
pub use task::{HttpTaskService, TaskReceipt, TaskService, TaskSubmission};
