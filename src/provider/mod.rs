//! Capabilities the engine consumes but does not implement.
//!
//! - [`Generator`]: prompt in, completed text out
//! - [`Retriever`]: ranked document chunks for a query
//! - [`VisionAnalyzer`]: structured findings for a stored image
//!
//! [`ollama::OllamaGenerator`] adapts a local Ollama server to [`Generator`];
//! [`pubmed::PubMedRetriever`] searches PubMed through NCBI E-utilities;
//! [`scripted::ScriptedGenerator`] replays canned responses for tests and demos.

pub mod ollama;
pub mod pubmed;
pub mod scripted;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tool::ToolDescriptor;

pub use ollama::{OllamaConfig, OllamaGenerator};
pub use pubmed::{PubMedConfig, PubMedRetriever};
pub use scripted::ScriptedGenerator;

/// Errors from external capability providers.
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    #[error("provider is not available at {url}")]
    #[diagnostic(
        code(medgate::provider::unavailable),
        help("Check that the service is running. For generation, start Ollama with `ollama serve` or point `ollama.base_url` at a running server.")
    )]
    Unavailable { url: String },

    #[error("provider request failed: {message}")]
    #[diagnostic(
        code(medgate::provider::request_failed),
        help("Check that the provider is running and the model is pulled.")
    )]
    Request { message: String },

    #[error("failed to parse provider response: {message}")]
    #[diagnostic(
        code(medgate::provider::parse_error),
        help("The provider returned an unexpected response format.")
    )]
    Parse { message: String },

    #[error("provider call timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(medgate::provider::timeout),
        help("Raise `limits.generation_timeout_ms` or use a smaller model.")
    )]
    Timeout { timeout_ms: u64 },

    #[error("scripted generator exhausted after {calls} calls")]
    #[diagnostic(code(medgate::provider::exhausted))]
    Exhausted { calls: usize },
}

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

// ── Generation ──

/// One text-generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Tools the caller may choose from; providers with native tool calling
    /// can forward these, others rely on the prompt text.
    pub tools: Vec<ToolDescriptor>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDescriptor>) -> Self {
        self.tools = tools;
        self
    }
}

/// Text generation capability.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, request: GenerationRequest) -> ProviderResult<String>;
}

// ── Retrieval ──

/// A ranked chunk returned by a [`Retriever`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: usize,
    pub text: String,
    pub score: f32,
}

/// Document retrieval capability.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> ProviderResult<Vec<RetrievedChunk>>;
}

// ── Vision ──

/// Structured image analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisionReport {
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub differentials: Vec<String>,
}

/// Image analysis capability.
#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, image_ref: &str, context: Option<&str>) -> ProviderResult<VisionReport>;
}
