//! Per-run context: session trace, event delivery, cancellation and call limits.
//!
//! Every suspension point of a run (a generation call, a tool call, event
//! delivery) goes through [`RunContext`], which is where cancellation and
//! per-call timeouts are enforced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::CallLimits;
use crate::provider::{GenerationRequest, Generator, ProviderError, ProviderResult};
use crate::tool::{ToolError, ToolInvocation, ToolRegistry, ToolResult};
use crate::workflow::event::{ToolCallStatus, WorkflowEvent};
use crate::workflow::session::{
    StepStatus, ToolInvocationRecord, ToolOutcome, WorkflowSession, WorkflowType,
};

use super::error::{AgentError, AgentResult};

/// Shared state for everything working on one workflow run.
pub struct RunContext {
    session: Arc<Mutex<WorkflowSession>>,
    events: mpsc::Sender<WorkflowEvent>,
    cancel: CancellationToken,
    limits: CallLimits,
    generator: Arc<dyn Generator>,
    /// Timeouts per tool name within this run.
    strikes: Mutex<HashMap<String, u32>>,
}

impl RunContext {
    pub fn new(
        session: Arc<Mutex<WorkflowSession>>,
        events: mpsc::Sender<WorkflowEvent>,
        cancel: CancellationToken,
        limits: CallLimits,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            session,
            events,
            cancel,
            limits,
            generator,
            strikes: Mutex::new(HashMap::new()),
        }
    }

    /// A context over a fresh running session, for driving agents directly.
    ///
    /// Returns the receiving end of the event channel.
    pub fn standalone(
        query: &str,
        generator: Arc<dyn Generator>,
        limits: CallLimits,
        buffer: usize,
    ) -> AgentResult<(Self, mpsc::Receiver<WorkflowEvent>)> {
        let mut session = WorkflowSession::new(query, None);
        session.start()?;
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let ctx = Self::new(
            Arc::new(Mutex::new(session)),
            tx,
            CancellationToken::new(),
            limits,
            generator,
        );
        Ok((ctx, rx))
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn check_cancelled(&self) -> AgentResult<()> {
        if self.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// A clone of the current session state.
    pub fn session_snapshot(&self) -> WorkflowSession {
        self.session.lock().expect("session lock poisoned").clone()
    }

    fn with_session<T>(
        &self,
        f: impl FnOnce(&mut WorkflowSession) -> Result<T, crate::workflow::session::SessionError>,
    ) -> AgentResult<T> {
        let mut session = self.session.lock().expect("session lock poisoned");
        Ok(f(&mut session)?)
    }

    // ── Events ──

    /// Deliver an event to the observer.
    ///
    /// After cancellation only terminal events are delivered. A closed
    /// receiver cancels the run.
    pub async fn emit(&self, event: WorkflowEvent) {
        if event.is_terminal() {
            if self.events.send(event).await.is_err() {
                tracing::debug!("terminal event dropped: observer gone");
            }
            return;
        }
        if self.is_cancelled() {
            return;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {}
            sent = self.events.send(event) => {
                if sent.is_err() {
                    tracing::info!("event stream dropped, cancelling run");
                    self.cancel.cancel();
                }
            }
        }
    }

    // ── Steps ──

    /// Append a running step and announce it.
    pub async fn begin_step(
        &self,
        title: impl Into<String>,
        rationale: impl Into<String>,
        agent: Option<&str>,
    ) -> AgentResult<usize> {
        self.check_cancelled()?;
        let title = title.into();
        let rationale = rationale.into();
        let ordinal = self.with_session(|s| s.push_step(title.clone(), rationale.clone(), agent))?;
        self.emit(WorkflowEvent::Reasoning {
            step: ordinal,
            title,
            description: rationale,
            status: StepStatus::Running,
            agent: agent.map(str::to_string),
        })
        .await;
        Ok(ordinal)
    }

    /// Move a step to `status`, optionally replacing its rationale, and announce it.
    pub async fn finish_step(
        &self,
        ordinal: usize,
        status: StepStatus,
        rationale: Option<String>,
    ) -> AgentResult<()> {
        let step = self.with_session(|s| {
            if let Some(r) = rationale {
                s.set_step_rationale(ordinal, r)?;
            }
            s.set_step_status(ordinal, status)?;
            Ok(s.steps[ordinal].clone())
        })?;
        self.emit(WorkflowEvent::Reasoning {
            step: ordinal,
            title: step.title,
            description: step.rationale,
            status,
            agent: step.agent,
        })
        .await;
        Ok(())
    }

    pub fn set_workflow_type(&self, workflow_type: WorkflowType) -> AgentResult<()> {
        self.with_session(|s| s.set_workflow_type(workflow_type))
    }

    // ── External calls ──

    /// Run one generation call under the generation timeout.
    ///
    /// The outer result only fails on cancellation; provider failures and
    /// timeouts are returned inside.
    pub async fn generate(&self, request: GenerationRequest) -> AgentResult<ProviderResult<String>> {
        self.check_cancelled()?;
        let timeout = self.limits.generation_timeout();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            result = tokio::time::timeout(timeout, self.generator.complete(request)) => {
                Ok(result.unwrap_or_else(|_| {
                    tracing::warn!(timeout_ms = self.limits.generation_timeout_ms, "generation timed out");
                    Err(ProviderError::Timeout {
                        timeout_ms: self.limits.generation_timeout_ms,
                    })
                }))
            }
        }
    }

    /// Run one tool call under the tool timeout, honouring suppression.
    ///
    /// The outer result only fails on cancellation.
    pub async fn invoke_tool(
        &self,
        tools: &ToolRegistry,
        name: &str,
        input: Value,
    ) -> AgentResult<ToolResult<ToolInvocation>> {
        self.check_cancelled()?;
        let limit = self.limits.timeout_strike_limit;
        let strikes = self.strikes(name);
        if strikes >= limit {
            return Ok(Err(ToolError::Suppressed {
                tool: name.into(),
                timeouts: strikes,
            }));
        }

        let timeout = self.limits.tool_timeout();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            result = tokio::time::timeout(timeout, tools.invoke(name, input)) => {
                Ok(result.unwrap_or_else(|_| {
                    let strikes = self.add_strike(name);
                    tracing::warn!(tool = name, strikes, "tool call timed out");
                    Err(ToolError::Timeout {
                        tool: name.into(),
                        timeout_ms: self.limits.tool_timeout_ms,
                    })
                }))
            }
        }
    }

    fn strikes(&self, tool: &str) -> u32 {
        self.strikes
            .lock()
            .expect("strike lock poisoned")
            .get(tool)
            .copied()
            .unwrap_or(0)
    }

    fn add_strike(&self, tool: &str) -> u32 {
        let mut strikes = self.strikes.lock().expect("strike lock poisoned");
        let count = strikes.entry(tool.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Invoke a tool on behalf of step `ordinal`: emits the tool_call events and
    /// records the invocation in the step trace.
    ///
    /// Returns the observation text handed back to the reasoning loop.
    pub async fn call_tool_for_step(
        &self,
        ordinal: usize,
        tools: &ToolRegistry,
        name: &str,
        input: Value,
    ) -> AgentResult<String> {
        self.emit(WorkflowEvent::ToolCall {
            step: ordinal,
            tool: name.into(),
            input: input.clone(),
            output: None,
            duration_ms: None,
            status: ToolCallStatus::Running,
        })
        .await;

        let result = self.invoke_tool(tools, name, input.clone()).await?;
        let (record, observation, status) = match result {
            Ok(invocation) => {
                let duration_ms = invocation.duration.as_millis() as u64;
                (
                    ToolInvocationRecord {
                        name: name.into(),
                        input: input.clone(),
                        output: Some(invocation.output.clone()),
                        error: None,
                        duration_ms,
                        outcome: ToolOutcome::Success,
                    },
                    invocation.output.to_string(),
                    ToolCallStatus::Done,
                )
            }
            Err(e) => {
                let outcome = match e {
                    ToolError::Timeout { .. } => ToolOutcome::TimedOut,
                    ToolError::Suppressed { .. } => ToolOutcome::Suppressed,
                    _ => ToolOutcome::Failed,
                };
                (
                    ToolInvocationRecord {
                        name: name.into(),
                        input: input.clone(),
                        output: None,
                        error: Some(e.to_string()),
                        duration_ms: 0,
                        outcome,
                    },
                    format!("error: {e}"),
                    ToolCallStatus::Error,
                )
            }
        };

        let event_output = record
            .output
            .clone()
            .or_else(|| record.error.clone().map(Value::String));
        let duration_ms = record.duration_ms;
        self.with_session(|s| s.attach_tool(ordinal, record))?;
        self.emit(WorkflowEvent::ToolCall {
            step: ordinal,
            tool: name.into(),
            input,
            output: event_output,
            duration_ms: Some(duration_ms),
            status,
        })
        .await;
        Ok(observation)
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("cancelled", &self.is_cancelled())
            .field("limits", &self.limits)
            .finish()
    }
}
