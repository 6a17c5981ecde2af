//! Tool capability registry: schema-checked async tools with runtime registration.
//!
//! Every external capability the reasoning loop can reach (graph search,
//! calculators, document retrieval, vision) implements [`Tool`] and is
//! registered once in a [`ToolRegistry`]. The registry compiles each tool's
//! JSON Schema at registration and validates every input against it before
//! the tool runs.

pub mod builtin;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use jsonschema::JSONSchema;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use builtin::{register_builtin_tools, Capabilities};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors from tool registration and invocation.
#[derive(Debug, Error, Diagnostic)]
pub enum ToolError {
    #[error("tool already registered: \"{name}\"")]
    #[diagnostic(
        code(medgate::tool::duplicate),
        help("Tool names are unique. Pick a different name or drop the earlier registration.")
    )]
    DuplicateTool { name: String },

    #[error("unknown tool: \"{name}\"")]
    #[diagnostic(
        code(medgate::tool::unknown),
        help("List the registered tools with `medgate tools`.")
    )]
    UnknownTool { name: String },

    #[error("tool \"{name}\" has an invalid input schema: {message}")]
    #[diagnostic(
        code(medgate::tool::invalid_schema),
        help("The input schema must be a valid JSON Schema document.")
    )]
    InvalidSchema { name: String, message: String },

    #[error("invalid input for tool \"{tool}\": {message}")]
    #[diagnostic(
        code(medgate::tool::invalid_input),
        help("Check the input against the tool's parameter schema.")
    )]
    InvalidInput { tool: String, message: String },

    #[error("tool \"{tool}\" failed: {message}")]
    #[diagnostic(code(medgate::tool::execution))]
    Execution { tool: String, message: String },

    #[error("tool \"{tool}\" timed out after {timeout_ms}ms")]
    #[diagnostic(
        code(medgate::tool::timeout),
        help("Raise `limits.tool_timeout_ms` if the backing service is slow.")
    )]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("tool \"{tool}\" suppressed for this run after {timeouts} timeouts")]
    #[diagnostic(
        code(medgate::tool::suppressed),
        help("The tool kept timing out. It is available again in the next run.")
    )]
    Suppressed { tool: String, timeouts: u32 },
}

/// Result type for tool operations.
pub type ToolResult<T> = std::result::Result<T, ToolError>;

impl ToolError {
    /// Shorthand for an execution failure inside a tool body.
    pub fn execution(tool: &str, message: impl Into<String>) -> Self {
        Self::Execution {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// Description of a tool's interface, as shown to the reasoning loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique name of the tool.
    pub name: String,
    /// What this tool does.
    pub description: String,
    /// JSON Schema the input must satisfy.
    pub parameter_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameter_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema,
        }
    }
}

/// A capability the reasoning loop can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Describe this tool's interface. Must return the same value every call.
    fn descriptor(&self) -> ToolDescriptor;

    /// Run the tool on an input that already passed schema validation.
    async fn invoke(&self, input: Value) -> ToolResult<Value>;
}

/// Output of one successful invocation.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub output: Value,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

struct RegisteredTool {
    descriptor: ToolDescriptor,
    schema: JSONSchema,
    tool: Arc<dyn Tool>,
}

/// Registry of available tools, keyed by unique name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<RegisteredTool>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its input schema.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> ToolResult<()> {
        let descriptor = tool.descriptor();
        if self.tools.contains_key(&descriptor.name) {
            return Err(ToolError::DuplicateTool {
                name: descriptor.name,
            });
        }
        let schema = JSONSchema::compile(&descriptor.parameter_schema).map_err(|e| {
            ToolError::InvalidSchema {
                name: descriptor.name.clone(),
                message: e.to_string(),
            }
        })?;
        tracing::debug!(tool = %descriptor.name, "tool registered");
        self.tools.insert(
            descriptor.name.clone(),
            Arc::new(RegisteredTool {
                descriptor,
                schema,
                tool,
            }),
        );
        Ok(())
    }

    /// Validate `input` and run the named tool.
    ///
    /// A panic inside the tool is caught and reported as an execution error.
    pub async fn invoke(&self, name: &str, input: Value) -> ToolResult<ToolInvocation> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool { name: name.into() })?;

        if let Err(errors) = entry.schema.validate(&input) {
            let message = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ToolError::InvalidInput {
                tool: name.into(),
                message,
            });
        }

        let started = Instant::now();
        let result = AssertUnwindSafe(entry.tool.invoke(input))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool panicked".into());
                Err(ToolError::execution(name, format!("panicked: {message}")))
            });
        let duration = started.elapsed();

        match &result {
            Ok(_) => tracing::debug!(tool = name, ?duration, "tool invocation succeeded"),
            Err(e) => tracing::warn!(tool = name, ?duration, error = %e, "tool invocation failed"),
        }
        result.map(|output| ToolInvocation { output, duration })
    }

    /// All registered descriptors, sorted by name.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor.clone()).collect()
    }

    /// A registry restricted to `names`, sharing the same tool instances.
    ///
    /// Names that are not registered are skipped.
    pub fn subset(&self, names: &[&str]) -> ToolRegistry {
        let tools = names
            .iter()
            .filter_map(|n| self.tools.get(*n).map(|t| ((*n).to_string(), Arc::clone(t))))
            .collect();
        ToolRegistry { tools }
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}
