//! Object-selection mask workflow.
//!
//! This crate provides:
//! - `SelectionStore`: undoable selection state with bounded history
//! - `OperationResolver`: turns intent decisions into preview requests
//! - `Workflow`: the mask confirmation state machine for one session
//! - `TaskPoller`: idempotent polling of the background task it submits

pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod refine;
pub mod resolver;
pub mod session;
pub mod state;
pub mod store;

pub use config::WorkflowConfig;
pub use error::{WorkflowError, WorkflowResult};
pub use history::{SelectionHistory, DEFAULT_HISTORY_CAPACITY};
pub use logging::{init_tracing, SessionLogger};
pub use poller::{PollSink, PollerHandle, TaskPoller, TerminalGuard};
pub use resolver::{OperationResolver, PreviewPlan, ResolveOutcome};
pub use session::{Workflow, WorkflowBuilder};
pub use state::{AssetContext, TaskFailure, WorkflowState};
pub use store::{Command, Mutation, SelectionStore};
