//! The workflow engine: spawns session tasks and answers listing queries.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentError, RunContext, Supervisor};
use crate::config::EngineConfig;
use crate::graph::TemporalGraph;
use crate::provider::Generator;
use crate::tool::{ToolDescriptor, ToolRegistry};

use super::archive::SessionArchive;
use super::event::WorkflowEvent;
use super::run::WorkflowRun;
use super::session::{WorkflowSession, WorkflowSummary, WorkflowType};
use super::{WorkflowError, WorkflowResult};

type SharedSession = Arc<Mutex<WorkflowSession>>;

/// Entry point for running and inspecting clinical workflows.
pub struct WorkflowEngine {
    config: EngineConfig,
    generator: Arc<dyn Generator>,
    tools: Arc<ToolRegistry>,
    graph: Arc<TemporalGraph>,
    archive: Option<Arc<dyn SessionArchive>>,
    /// Running sessions, plus finished ones that were not archived.
    sessions: Arc<DashMap<Uuid, SharedSession>>,
}

impl WorkflowEngine {
    pub fn new(
        config: EngineConfig,
        generator: Arc<dyn Generator>,
        tools: ToolRegistry,
        graph: Arc<TemporalGraph>,
    ) -> Self {
        Self {
            config,
            generator,
            tools: Arc::new(tools),
            graph,
            archive: None,
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Write sessions through to `archive` at start and at their terminal
    /// state. Once archived, a finished session is dropped from memory.
    pub fn with_archive(mut self, archive: Arc<dyn SessionArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graph(&self) -> &Arc<TemporalGraph> {
        &self.graph
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.tools.list()
    }

    /// Start a session for `query` and return its event stream.
    ///
    /// `workflow_type` of `None`, `"auto"` or blank lets the supervisor
    /// classify. Validation happens before any session exists.
    pub fn run_workflow(&self, query: &str, workflow_type: Option<&str>) -> WorkflowResult<WorkflowRun> {
        let query = query.trim();
        if query.is_empty() {
            return Err(WorkflowError::InvalidInput {
                message: "query must not be empty".into(),
            });
        }
        let requested = WorkflowType::parse_requested(workflow_type)
            .map_err(|message| WorkflowError::InvalidInput { message })?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| WorkflowError::NoRuntime)?;

        let session = WorkflowSession::new(query, requested);
        let session_id = session.id;
        let shared: SharedSession = Arc::new(Mutex::new(session));
        self.sessions.insert(session_id, Arc::clone(&shared));

        let (tx, rx) = mpsc::channel(self.config.stream.event_buffer.max(1));
        let cancel = CancellationToken::new();
        let job = SessionJob {
            session_id,
            session: shared,
            query: query.to_string(),
            requested,
            events: tx,
            cancel: cancel.clone(),
            config: self.config.clone(),
            generator: Arc::clone(&self.generator),
            tools: Arc::clone(&self.tools),
            archive: self.archive.clone(),
            live: Arc::clone(&self.sessions),
        };
        tracing::info!(%session_id, workflow_type = ?requested, "workflow accepted");
        runtime.spawn(job.run());
        Ok(WorkflowRun::new(session_id, rx, cancel))
    }

    /// Every known session, newest first. Archived sessions are included;
    /// live ones take precedence over their archived copy.
    pub fn list_workflows(&self) -> Vec<WorkflowSummary> {
        let mut merged: HashMap<Uuid, WorkflowSummary> = self
            .load_archived()
            .into_iter()
            .map(|s| (s.id, s.summary()))
            .collect();
        for entry in self.sessions.iter() {
            let summary = entry.value().lock().expect("session lock poisoned").summary();
            merged.insert(summary.id, summary);
        }
        let mut summaries: Vec<WorkflowSummary> = merged.into_values().collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// The full session, including every reasoning step.
    pub fn workflow_detail(&self, id: Uuid) -> WorkflowResult<WorkflowSession> {
        if let Some(live) = self.sessions.get(&id) {
            return Ok(live.value().lock().expect("session lock poisoned").clone());
        }
        self.load_archived()
            .into_iter()
            .find(|s| s.id == id)
            .ok_or(WorkflowError::UnknownWorkflow { id })
    }

    fn load_archived(&self) -> Vec<WorkflowSession> {
        let Some(archive) = &self.archive else {
            return Vec::new();
        };
        archive.load_sessions().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load archived sessions");
            Vec::new()
        })
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("tools", &self.tools.len())
            .field("sessions", &self.sessions.len())
            .field("archived", &self.archive.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Session task
// ---------------------------------------------------------------------------

/// Everything one session task owns.
struct SessionJob {
    session_id: Uuid,
    session: SharedSession,
    query: String,
    requested: Option<WorkflowType>,
    events: mpsc::Sender<WorkflowEvent>,
    cancel: CancellationToken,
    config: EngineConfig,
    generator: Arc<dyn Generator>,
    tools: Arc<ToolRegistry>,
    archive: Option<Arc<dyn SessionArchive>>,
    live: Arc<DashMap<Uuid, SharedSession>>,
}

impl SessionJob {
    async fn run(self) {
        let session_id = self.session_id;
        let session = Arc::clone(&self.session);
        let events = self.events.clone();
        let archive = self.archive.clone();
        let live = Arc::clone(&self.live);

        if let Err(panic) = AssertUnwindSafe(self.drive()).catch_unwind().await {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            let fatal = AgentError::SessionFatal { message };
            tracing::error!(%session_id, error = %fatal, "session task panicked");

            // The panic may have poisoned the lock mid-update; the session
            // must still end failed.
            let snapshot = {
                let mut s = session.lock().unwrap_or_else(|p| p.into_inner());
                if !s.is_terminal() {
                    let _ = s.fail(fatal.to_string());
                }
                s.clone()
            };
            let archived = store(archive.as_deref(), &snapshot);
            let _ = events
                .send(WorkflowEvent::Error {
                    session_id,
                    message: fatal.to_string(),
                })
                .await;
            if archived {
                live.remove(&session_id);
            }
        }
    }

    async fn drive(self) {
        let ctx = RunContext::new(
            Arc::clone(&self.session),
            self.events.clone(),
            self.cancel.clone(),
            self.config.limits.clone(),
            Arc::clone(&self.generator),
        );

        let started = {
            let mut s = self.session.lock().expect("session lock poisoned");
            s.start().map(|_| s.clone())
        };
        let terminal = match started {
            Ok(snapshot) => {
                store(self.archive.as_deref(), &snapshot);
                self.execute(&ctx).await
            }
            Err(e) => {
                tracing::error!(session_id = %self.session_id, error = %e, "session could not start");
                self.fail(&AgentError::from(e))
            }
        };

        let snapshot = self.session.lock().expect("session lock poisoned").clone();
        let archived = store(self.archive.as_deref(), &snapshot);
        ctx.emit(terminal).await;
        // Finished sessions are served from the archive from here on.
        if archived {
            self.live.remove(&self.session_id);
        }
    }

    /// Run the supervisor and settle the session. Returns the terminal event.
    async fn execute(&self, ctx: &RunContext) -> WorkflowEvent {
        let session_id = self.session_id;
        tracing::info!(%session_id, "workflow started");
        ctx.emit(WorkflowEvent::WorkflowStart {
            session_id,
            query: self.query.clone(),
            workflow_type: self.requested,
        })
        .await;

        let supervisor = Supervisor::new(&self.config.react, &self.tools);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
            outcome = supervisor.run(ctx, &self.query, self.requested) => outcome,
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(&e),
        };
        for text in chunk_text(&outcome.answer, self.config.stream.token_chunk_chars) {
            ctx.emit(WorkflowEvent::Token { text }).await;
        }
        let completed = if ctx.is_cancelled() {
            Err(AgentError::Cancelled)
        } else {
            let mut s = self.session.lock().expect("session lock poisoned");
            s.complete(outcome.answer.clone(), outcome.verdict.clone())
                .map_err(AgentError::from)
        };
        match completed {
            Ok(()) => {
                tracing::info!(
                    %session_id,
                    verdict = ?outcome.verdict.status(),
                    "workflow completed"
                );
                WorkflowEvent::WorkflowDone {
                    session_id,
                    final_answer: outcome.answer,
                    verdict: outcome.verdict.status(),
                }
            }
            Err(e) => self.fail(&e),
        }
    }

    fn fail(&self, error: &AgentError) -> WorkflowEvent {
        let session_id = self.session_id;
        let message = error.to_string();
        if matches!(error, AgentError::Cancelled) {
            tracing::info!(%session_id, "workflow cancelled");
        } else {
            tracing::error!(%session_id, error = %message, "workflow failed");
        }
        let mut s = self.session.lock().expect("session lock poisoned");
        if let Err(e) = s.fail(message.clone()) {
            tracing::warn!(%session_id, error = %e, "session already terminal");
        }
        WorkflowEvent::Error { session_id, message }
    }
}

/// Archive failures never fail a session. Returns whether the session was
/// written.
fn store(archive: Option<&dyn SessionArchive>, session: &WorkflowSession) -> bool {
    let Some(archive) = archive else {
        return false;
    };
    match archive.store_session(session) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %e, "failed to archive session");
            false
        }
    }
}

/// Split `text` into chunks of at most `size` characters.
fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::provider::ScriptedGenerator;
    use crate::workflow::session::SessionStatus;
    use tokio_stream::StreamExt;

    const APPROVE: &str = r#"{"status": "approved", "confidence": 0.9, "flags": []}"#;

    fn engine(generator: ScriptedGenerator) -> WorkflowEngine {
        WorkflowEngine::new(
            EngineConfig::default(),
            Arc::new(generator),
            ToolRegistry::new(),
            Arc::new(TemporalGraph::new()),
        )
    }

    #[derive(Default)]
    struct MemoryArchive {
        sessions: Mutex<HashMap<Uuid, WorkflowSession>>,
    }

    impl SessionArchive for MemoryArchive {
        fn store_session(&self, session: &WorkflowSession) -> Result<(), StoreError> {
            self.sessions.lock().unwrap().insert(session.id, session.clone());
            Ok(())
        }

        fn load_sessions(&self) -> Result<Vec<WorkflowSession>, StoreError> {
            Ok(self.sessions.lock().unwrap().values().cloned().collect())
        }
    }

    struct BrokenArchive;

    impl SessionArchive for BrokenArchive {
        fn store_session(&self, _: &WorkflowSession) -> Result<(), StoreError> {
            Err(StoreError::Redb { message: "disk full".into() })
        }

        fn load_sessions(&self) -> Result<Vec<WorkflowSession>, StoreError> {
            Err(StoreError::Redb { message: "disk full".into() })
        }
    }

    #[test]
    fn chunks_by_characters() {
        assert_eq!(chunk_text("abcdef", 4), ["abcd", "ef"]);
        assert_eq!(chunk_text("ééé", 2), ["éé", "é"]);
        assert!(chunk_text("", 4).is_empty());
    }

    #[tokio::test]
    async fn empty_query_is_rejected_before_a_session_exists() {
        let engine = engine(ScriptedGenerator::default());
        let err = engine.run_workflow("   ", None).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidInput { .. }));
        let err = engine.run_workflow("q", Some("surgery")).unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidInput { .. }));
        assert!(engine.list_workflows().is_empty());
    }

    #[tokio::test]
    async fn general_run_streams_to_completion() {
        let answer = "Rest and hydration are usually enough for a mild cold.";
        let engine = engine(ScriptedGenerator::new([
            r#"{"thought": "simple", "final_answer": "rest"}"#,
            answer,
            APPROVE,
        ]));
        let run = engine.run_workflow("How do I treat a cold?", Some("general")).unwrap();
        let id = run.session_id();
        let events: Vec<_> = run.collect().await;

        assert!(matches!(events.first(), Some(WorkflowEvent::WorkflowStart { .. })));
        let streamed: String = events
            .iter()
            .filter_map(|e| match e {
                WorkflowEvent::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, answer);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert!(matches!(events.last(), Some(WorkflowEvent::WorkflowDone { .. })));

        // No archive: the live map is the only record.
        assert_eq!(engine.sessions.len(), 1);
        let session = engine.workflow_detail(id).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.final_answer.as_deref(), Some(answer));
        for (i, step) in session.steps.iter().enumerate() {
            assert_eq!(step.ordinal, i);
        }
    }

    #[tokio::test]
    async fn archive_is_written_through_and_listed() {
        let archive = Arc::new(MemoryArchive::default());
        let engine = engine(ScriptedGenerator::new([
            r#"{"thought": "t", "final_answer": "a"}"#,
            "answer",
            APPROVE,
        ]))
        .with_archive(archive.clone());
        let run = engine.run_workflow("first", Some("research")).unwrap();
        let id = run.session_id();
        let _: Vec<_> = run.collect().await;

        let stored = archive.load_sessions().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, SessionStatus::Completed);

        let listed = engine.list_workflows();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }

    #[tokio::test]
    async fn archived_sessions_leave_memory_when_finished() {
        let archive = Arc::new(MemoryArchive::default());
        let engine = engine(ScriptedGenerator::new([
            r#"{"thought": "t", "final_answer": "a"}"#,
            "answer",
            APPROVE,
        ]))
        .with_archive(archive.clone());
        let run = engine.run_workflow("q", Some("general")).unwrap();
        let id = run.session_id();
        assert!(engine.sessions.contains_key(&id));
        let _: Vec<_> = run.collect().await;

        assert!(engine.sessions.is_empty());
        let detail = engine.workflow_detail(id).unwrap();
        assert_eq!(detail.status, SessionStatus::Completed);
        assert_eq!(detail.final_answer.as_deref(), Some("answer"));
    }

    #[tokio::test]
    async fn start_failure_still_emits_a_terminal_event() {
        let mut session = WorkflowSession::new("q", None);
        session.start().unwrap();
        let session_id = session.id;
        let shared: SharedSession = Arc::new(Mutex::new(session));
        let live = Arc::new(DashMap::new());
        live.insert(session_id, Arc::clone(&shared));
        let archive = Arc::new(MemoryArchive::default());
        let (tx, mut rx) = mpsc::channel(8);

        let job = SessionJob {
            session_id,
            session: Arc::clone(&shared),
            query: "q".into(),
            requested: None,
            events: tx,
            cancel: CancellationToken::new(),
            config: EngineConfig::default(),
            generator: Arc::new(ScriptedGenerator::default()),
            tools: Arc::new(ToolRegistry::new()),
            archive: Some(archive.clone()),
            live: Arc::clone(&live),
        };
        job.run().await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], WorkflowEvent::Error { session_id: id, .. } if *id == session_id));
        assert_eq!(shared.lock().unwrap().status, SessionStatus::Failed);
        assert_eq!(archive.load_sessions().unwrap()[0].status, SessionStatus::Failed);
        assert!(live.is_empty());
    }

    #[tokio::test]
    async fn archive_failures_do_not_fail_the_session() {
        let engine = engine(ScriptedGenerator::new([
            r#"{"thought": "t", "final_answer": "a"}"#,
            "answer",
            APPROVE,
        ]))
        .with_archive(Arc::new(BrokenArchive));
        let run = engine.run_workflow("q", Some("general")).unwrap();
        let id = run.session_id();
        let events: Vec<_> = run.collect().await;
        assert!(matches!(events.last(), Some(WorkflowEvent::WorkflowDone { .. })));
        assert_eq!(engine.workflow_detail(id).unwrap().status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_workflow_detail() {
        let engine = engine(ScriptedGenerator::default());
        let err = engine.workflow_detail(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownWorkflow { .. }));
    }

    #[tokio::test]
    async fn exhausted_generator_still_ends_with_one_terminal_event() {
        // Every generation call fails: the run degrades to a refusal.
        let engine = engine(ScriptedGenerator::default());
        let run = engine.run_workflow("q", None).unwrap();
        let id = run.session_id();
        let events: Vec<_> = run.collect().await;
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        let session = engine.workflow_detail(id).unwrap();
        assert!(session.is_terminal());
        if session.status == SessionStatus::Completed {
            let verdict = session.verdict.unwrap();
            assert!(!verdict.is_approved());
        }
    }
}
