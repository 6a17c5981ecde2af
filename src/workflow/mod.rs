//! Workflow sessions: lifecycle, event streaming, listing and archival.
//!
//! [`WorkflowEngine`] is the exposed surface. Each call to
//! [`WorkflowEngine::run_workflow`] spawns one session task and hands back a
//! [`WorkflowRun`]: the session's event stream plus its cancel handle.

pub mod archive;
pub mod engine;
pub mod event;
pub mod run;
pub mod session;

use miette::Diagnostic;
use thiserror::Error;
use uuid::Uuid;

pub use archive::SessionArchive;
pub use engine::WorkflowEngine;
pub use event::{ToolCallStatus, WorkflowEvent};
pub use run::WorkflowRun;
pub use session::{
    ReasoningStep, SessionError, SessionStatus, StepStatus, ToolInvocationRecord, ToolOutcome,
    WorkflowSession, WorkflowSummary, WorkflowType,
};

/// Errors surfaced to callers of the workflow engine.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkflowError {
    #[error("invalid workflow input: {message}")]
    #[diagnostic(
        code(medgate::workflow::invalid_input),
        help("Provide a non-empty query and a workflow type of general, diagnosis, treatment, medication, research or auto.")
    )]
    InvalidInput { message: String },

    #[error("unknown workflow: {id}")]
    #[diagnostic(
        code(medgate::workflow::unknown),
        help("List known sessions with `medgate workflows list`.")
    )]
    UnknownWorkflow { id: Uuid },

    #[error("no async runtime available to drive the workflow")]
    #[diagnostic(
        code(medgate::workflow::no_runtime),
        help("run_workflow must be called from inside a tokio runtime.")
    )]
    NoRuntime,
}

pub type WorkflowResult<T> = std::result::Result<T, WorkflowError>;
