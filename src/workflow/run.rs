//! The caller's handle on a running workflow.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use super::event::WorkflowEvent;

/// Event stream of one session, ending with exactly one terminal event.
///
/// Dropping the run cancels the session.
pub struct WorkflowRun {
    session_id: Uuid,
    events: ReceiverStream<WorkflowEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl WorkflowRun {
    pub(crate) fn new(
        session_id: Uuid,
        events: mpsc::Receiver<WorkflowEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            events: ReceiverStream::new(events),
            _guard: cancel.clone().drop_guard(),
            cancel,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Request cooperative cancellation. The stream still yields the
    /// terminal `error` event.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that cancels this run from elsewhere, e.g. a signal handler.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Stream for WorkflowRun {
    type Item = WorkflowEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.events).poll_next(cx) {
                // Events queued before cancellation are discarded too.
                Poll::Ready(Some(event)) if this.cancel.is_cancelled() && !event.is_terminal() => {
                    continue
                }
                other => return other,
            }
        }
    }
}

impl std::fmt::Debug for WorkflowRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRun")
            .field("session_id", &self.session_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn queued_progress_is_dropped_after_cancel() {
        let (tx, rx) = mpsc::channel(8);
        let id = Uuid::new_v4();
        let mut run = WorkflowRun::new(id, rx, CancellationToken::new());
        tx.send(WorkflowEvent::Token { text: "a".into() }).await.unwrap();
        tx.send(WorkflowEvent::Error {
            session_id: id,
            message: "workflow cancelled".into(),
        })
        .await
        .unwrap();
        drop(tx);

        run.cancel();
        let events: Vec<_> = (&mut run).collect().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].is_terminal());
    }

    #[tokio::test]
    async fn dropping_the_run_cancels() {
        let (_tx, rx) = mpsc::channel(1);
        let token = CancellationToken::new();
        let run = WorkflowRun::new(Uuid::new_v4(), rx, token.clone());
        assert!(!token.is_cancelled());
        drop(run);
        assert!(token.is_cancelled());
    }
}
