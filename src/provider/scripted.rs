//! Deterministic generator that replays queued responses.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{GenerationRequest, Generator, ProviderError, ProviderResult};

/// A queued response: either text or a failure.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(String),
}

/// Replays responses in order and records every prompt it receives.
///
/// Once the queue is empty every call fails with [`ProviderError::Exhausted`].
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<ScriptedReply>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| ScriptedReply::Text(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a text response.
    pub fn push(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .expect("script lock poisoned")
            .push_back(ScriptedReply::Text(reply.into()));
    }

    /// Queue a failed call.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies
            .lock()
            .expect("script lock poisoned")
            .push_back(ScriptedReply::Fail(message.into()));
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("script lock poisoned").clone()
    }

    /// Replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().expect("script lock poisoned").len()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, request: GenerationRequest) -> ProviderResult<String> {
        let calls = {
            let mut prompts = self.prompts.lock().expect("script lock poisoned");
            prompts.push(request.prompt);
            prompts.len()
        };
        let next = self.replies.lock().expect("script lock poisoned").pop_front();
        match next {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(message)) => Err(ProviderError::Request { message }),
            None => Err(ProviderError::Exhausted { calls }),
        }
    }
}
