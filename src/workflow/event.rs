//! Events streamed to observers of a workflow run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::adjudicator::VerdictStatus;

use super::session::{StepStatus, WorkflowType};

/// Progress of a single tool call as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Running,
    Done,
    Error,
}

/// One event in a workflow's stream.
///
/// Exactly one terminal event (`workflow_done` or `error`) ends every stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStart {
        session_id: Uuid,
        query: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        workflow_type: Option<WorkflowType>,
    },
    /// A step was created or changed status.
    Reasoning {
        step: usize,
        title: String,
        description: String,
        status: StepStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
    },
    ToolCall {
        step: usize,
        tool: String,
        input: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        status: ToolCallStatus,
    },
    Verification {
        status: VerdictStatus,
        flags: Vec<String>,
        confidence: f64,
    },
    /// A chunk of the released answer.
    Token { text: String },
    WorkflowDone {
        session_id: Uuid,
        final_answer: String,
        verdict: VerdictStatus,
    },
    Error {
        session_id: Uuid,
        message: String,
    },
}

impl WorkflowEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::WorkflowDone { .. } | Self::Error { .. })
    }
}
