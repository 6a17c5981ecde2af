//! Rich diagnostic error types for the medgate engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives
//! (graph, tools, providers, agents, workflows live next to their code). This
//! module holds the crate-level wrapper plus the errors shared by several
//! subsystems: storage and configuration.

use miette::Diagnostic;
use thiserror::Error;

use crate::agent::AgentError;
use crate::graph::GraphError;
use crate::provider::ProviderError;
use crate::tool::ToolError;
use crate::workflow::WorkflowError;

/// Top-level error type for the medgate engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum MedgateError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Workflow(#[from] WorkflowError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("I/O error: {source}")]
    #[diagnostic(
        code(medgate::store::io),
        help(
            "A filesystem operation failed. Check that the data directory exists, \
             has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        #[source]
        source: std::io::Error,
    },

    #[error("redb transaction error: {message}")]
    #[diagnostic(
        code(medgate::store::redb),
        help(
            "The embedded database encountered a transaction error. \
             This may indicate corruption. Try running with a fresh data directory."
        )
    )]
    Redb { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(
        code(medgate::store::serde),
        help(
            "Failed to serialize or deserialize stored data. \
             The stored format may have changed between versions; re-import the graph snapshot."
        )
    )]
    Serialization { message: String },
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file: {path}")]
    #[diagnostic(
        code(medgate::config::read),
        help("Check that the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    #[diagnostic(
        code(medgate::config::parse),
        help("The config file must be valid TOML. Unknown keys are ignored; check value types.")
    )]
    Parse { path: String, message: String },

    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(medgate::config::invalid),
        help("Iteration bounds, timeouts, buffer sizes and chunk sizes must all be greater than zero.")
    )]
    Invalid { message: String },
}

/// Convenience alias for crate-level results.
pub type MedgateResult<T> = std::result::Result<T, MedgateError>;
