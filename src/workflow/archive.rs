//! Write-through archive for workflow sessions.

use crate::error::StoreError;

use super::session::WorkflowSession;

/// Opaque persistence for sessions.
///
/// Called at session start and at the terminal state. Failures are logged by
/// the engine and never fail a session.
pub trait SessionArchive: Send + Sync {
    fn store_session(&self, session: &WorkflowSession) -> Result<(), StoreError>;

    fn load_sessions(&self) -> Result<Vec<WorkflowSession>, StoreError>;
}
