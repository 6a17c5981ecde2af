//! Agent-layer error types with rich miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use crate::workflow::session::SessionError;

/// Errors from the reasoning loop, specialists, supervisor and adjudicator.
///
/// Tool failures are not here: the loop absorbs them as observations.
#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error("workflow cancelled")]
    #[diagnostic(
        code(medgate::agent::cancelled),
        help("The caller cancelled the run or dropped its event stream.")
    )]
    Cancelled,

    #[error("specialist {specialist} produced unusable output: {message}")]
    #[diagnostic(
        code(medgate::agent::specialist_output),
        help(
            "Only this specialist's findings are dropped; the others still feed synthesis. \
             A model that ignores the output contract usually needs a stronger instruction model."
        )
    )]
    SpecialistOutput { specialist: String, message: String },

    #[error("could not parse adjudicator verdict: {message}")]
    #[diagnostic(
        code(medgate::agent::adjudication_parse),
        help("Malformed verdicts are treated as rejections.")
    )]
    AdjudicationParse { message: String },

    #[error("invalid delegation plan: {message}")]
    #[diagnostic(
        code(medgate::agent::invalid_plan),
        help("Each specialist may appear once, and its dependencies must come before it.")
    )]
    InvalidPlan { message: String },

    #[error("session failed: {message}")]
    #[diagnostic(code(medgate::agent::session_fatal))]
    SessionFatal { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),
}

/// Convenience alias for agent-layer results.
pub type AgentResult<T> = std::result::Result<T, AgentError>;
