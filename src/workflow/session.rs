//! Workflow session envelope: status, step trace, verdict.
//!
//! A session only moves forward (`pending → running → completed | failed`)
//! and is immutable once terminal. Steps are append-only; their ordinals are
//! the index into [`WorkflowSession::steps`], so they are gapless and never
//! reused.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::agent::adjudicator::VerificationVerdict;

/// Maximum characters of the query kept in a [`WorkflowSummary`].
const SUMMARY_CHARS: usize = 80;

/// Errors from illegal session mutations.
#[derive(Debug, Error, Diagnostic)]
pub enum SessionError {
    #[error("illegal session transition: {from} -> {to}")]
    #[diagnostic(
        code(medgate::session::illegal_transition),
        help("Session status only moves forward: pending, running, then completed or failed.")
    )]
    IllegalTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("session is already {status} and can no longer change")]
    #[diagnostic(code(medgate::session::terminal))]
    Terminal { status: SessionStatus },

    #[error("no reasoning step with ordinal {ordinal}")]
    #[diagnostic(code(medgate::session::unknown_step))]
    UnknownStep { ordinal: usize },

    #[error("illegal step transition for step {ordinal}: {from} -> {to}")]
    #[diagnostic(code(medgate::session::illegal_step_transition))]
    IllegalStepTransition {
        ordinal: usize,
        from: StepStatus,
        to: StepStatus,
    },
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Task classification that selects the delegation plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    General,
    Diagnosis,
    Treatment,
    Medication,
    Research,
}

impl WorkflowType {
    pub const ALL: [WorkflowType; 5] = [
        Self::General,
        Self::Diagnosis,
        Self::Treatment,
        Self::Medication,
        Self::Research,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Diagnosis => "diagnosis",
            Self::Treatment => "treatment",
            Self::Medication => "medication",
            Self::Research => "research",
        }
    }

    /// Parse a caller-supplied type. `auto` or blank means "classify".
    pub fn parse_requested(raw: Option<&str>) -> Result<Option<Self>, String> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) if s.eq_ignore_ascii_case("auto") => Ok(None),
            Some(s) => s.parse().map(Some),
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!(
                    "unknown workflow type \"{s}\" (expected auto, {})",
                    Self::ALL.map(Self::as_str).join(", ")
                )
            })
    }
}

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// How one tool invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Success,
    Failed,
    TimedOut,
    Suppressed,
}

// ---------------------------------------------------------------------------
// Steps and sessions
// ---------------------------------------------------------------------------

/// Audit record of one tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub name: String,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub outcome: ToolOutcome,
}

/// One entry of a session's step trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub ordinal: usize,
    pub title: String,
    pub rationale: String,
    pub status: StepStatus,
    /// Agent that produced the step (`supervisor`, a specialist name, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolInvocationRecord>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// The full record of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSession {
    pub id: Uuid,
    pub query: String,
    #[serde(default)]
    pub workflow_type: Option<WorkflowType>,
    pub status: SessionStatus,
    #[serde(default)]
    pub steps: Vec<ReasoningStep>,
    #[serde(default)]
    pub final_answer: Option<String>,
    #[serde(default)]
    pub verdict: Option<VerificationVerdict>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Listing view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: Uuid,
    pub workflow_type: Option<WorkflowType>,
    pub status: SessionStatus,
    pub input_summary: String,
    pub created_at: DateTime<Utc>,
}

impl WorkflowSession {
    pub fn new(query: impl Into<String>, workflow_type: Option<WorkflowType>) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            workflow_type,
            status: SessionStatus::Pending,
            steps: Vec::new(),
            final_answer: None,
            verdict: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn ensure_open(&self) -> SessionResult<()> {
        if self.is_terminal() {
            Err(SessionError::Terminal {
                status: self.status,
            })
        } else {
            Ok(())
        }
    }

    fn transition(&mut self, to: SessionStatus) -> SessionResult<()> {
        self.ensure_open()?;
        if to.rank() <= self.status.rank() {
            return Err(SessionError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// `pending → running`.
    pub fn start(&mut self) -> SessionResult<()> {
        self.transition(SessionStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record the classification chosen for this run.
    pub fn set_workflow_type(&mut self, workflow_type: WorkflowType) -> SessionResult<()> {
        self.ensure_open()?;
        self.workflow_type = Some(workflow_type);
        Ok(())
    }

    /// `running → completed` with the released text and the verdict behind it.
    pub fn complete(
        &mut self,
        final_answer: impl Into<String>,
        verdict: VerificationVerdict,
    ) -> SessionResult<()> {
        if self.status != SessionStatus::Running {
            self.ensure_open()?;
            return Err(SessionError::IllegalTransition {
                from: self.status,
                to: SessionStatus::Completed,
            });
        }
        self.transition(SessionStatus::Completed)?;
        self.final_answer = Some(final_answer.into());
        self.verdict = Some(verdict);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Move to `failed`, closing every unfinished step as failed.
    pub fn fail(&mut self, message: impl Into<String>) -> SessionResult<()> {
        self.transition(SessionStatus::Failed)?;
        let now = Utc::now();
        for step in self.steps.iter_mut().filter(|s| !s.status.is_terminal()) {
            step.status = StepStatus::Failed;
            step.completed_at = Some(now);
        }
        self.error = Some(message.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// Append a step in `running` state and return its ordinal.
    pub fn push_step(
        &mut self,
        title: impl Into<String>,
        rationale: impl Into<String>,
        agent: Option<&str>,
    ) -> SessionResult<usize> {
        self.ensure_open()?;
        let ordinal = self.steps.len();
        self.steps.push(ReasoningStep {
            ordinal,
            title: title.into(),
            rationale: rationale.into(),
            status: StepStatus::Running,
            agent: agent.map(str::to_string),
            tool: None,
            started_at: Utc::now(),
            completed_at: None,
        });
        Ok(ordinal)
    }

    fn step_mut(&mut self, ordinal: usize) -> SessionResult<&mut ReasoningStep> {
        self.ensure_open()?;
        self.steps
            .get_mut(ordinal)
            .ok_or(SessionError::UnknownStep { ordinal })
    }

    /// Move a step forward. Terminal step states are final.
    pub fn set_step_status(&mut self, ordinal: usize, status: StepStatus) -> SessionResult<()> {
        let step = self.step_mut(ordinal)?;
        let allowed = match (step.status, status) {
            (from, to) if from == to => true,
            (StepStatus::Pending, _) => true,
            (StepStatus::Running, StepStatus::Done | StepStatus::Failed) => true,
            _ => false,
        };
        if !allowed {
            return Err(SessionError::IllegalStepTransition {
                ordinal,
                from: step.status,
                to: status,
            });
        }
        step.status = status;
        if status.is_terminal() && step.completed_at.is_none() {
            step.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Amend a step's rationale (e.g. with the observation it produced).
    pub fn set_step_rationale(&mut self, ordinal: usize, rationale: impl Into<String>) -> SessionResult<()> {
        self.step_mut(ordinal)?.rationale = rationale.into();
        Ok(())
    }

    /// Attach the audit record of the tool call a step performed.
    pub fn attach_tool(&mut self, ordinal: usize, record: ToolInvocationRecord) -> SessionResult<()> {
        self.step_mut(ordinal)?.tool = Some(record);
        Ok(())
    }

    pub fn summary(&self) -> WorkflowSummary {
        let mut input_summary: String = self.query.chars().take(SUMMARY_CHARS).collect();
        if self.query.chars().count() > SUMMARY_CHARS {
            input_summary.push('…');
        }
        WorkflowSummary {
            id: self.id,
            workflow_type: self.workflow_type,
            status: self.status,
            input_summary,
            created_at: self.created_at,
        }
    }
}
