//! Scripted provider: replays a fixed sequence of responses.
//!
//! Registered under the `mock` kind and used by every loop test. Each call to
//! `complete` pops the next step; what happens once the script runs dry is
//! configurable (fail, repeat the last step, or answer with fixed text).

use std::collections::VecDeque;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ratchet_core::error::ProviderError;
use ratchet_core::message::{Message, ToolCall};
use ratchet_core::provider::{Embedder, Provider, ProviderRequest, ProviderResponse, Usage};
use tracing::debug;

/// One scripted provider turn.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(ProviderResponse),
    Fail(ProviderError),
}

#[derive(Debug, Clone)]
enum WhenExhausted {
    Fail,
    RepeatLast,
    Reply(String),
}

/// Build a plain-text response.
pub fn text_response(content: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(content),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock".into(),
    }
}

/// Build a response that asks for tool calls.
pub fn tool_call_response(content: &str, calls: Vec<ToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant_with_tools(content, calls),
        ..text_response(content)
    }
}

pub struct ScriptedProvider {
    model: String,
    steps: Mutex<VecDeque<ScriptStep>>,
    last: Mutex<Option<ScriptStep>>,
    requests: Mutex<Vec<ProviderRequest>>,
    exhausted: WhenExhausted,
    latency: Duration,
    embedding_dims: Option<usize>,
}

impl ScriptedProvider {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            model: "mock".into(),
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            exhausted: WhenExhausted::Fail,
            latency: Duration::ZERO,
            embedding_dims: None,
        }
    }

    /// Script made only of successful replies.
    pub fn from_responses(responses: Vec<ProviderResponse>) -> Self {
        Self::new(responses.into_iter().map(ScriptStep::Reply).collect())
    }

    /// A provider that always gives the same answer.
    pub fn always(content: &str) -> Self {
        Self::new(Vec::new()).or_reply(content)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Keep replaying the final step once the script is used up.
    pub fn repeat_last(mut self) -> Self {
        self.exhausted = WhenExhausted::RepeatLast;
        self
    }

    /// Answer with `content` once the script is used up.
    pub fn or_reply(mut self, content: &str) -> Self {
        self.exhausted = WhenExhausted::Reply(content.to_string());
        self
    }

    /// Sleep before every reply.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Advertise a deterministic bag-of-words embedder with `dims` dimensions.
    pub fn with_embeddings(mut self, dims: usize) -> Self {
        self.embedding_dims = Some(dims.max(1));
        self
    }

    /// How many times `complete` has been called.
    pub fn call_count(&self) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Every request seen so far, oldest first.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Steps not yet consumed.
    pub fn remaining(&self) -> usize {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn next_step(&self) -> Option<ScriptStep> {
        let popped = self
            .steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        match popped {
            Some(step) => {
                *last = Some(step.clone());
                Some(step)
            }
            None => match &self.exhausted {
                WhenExhausted::Fail => None,
                WhenExhausted::RepeatLast => last.clone(),
                WhenExhausted::Reply(text) => Some(ScriptStep::Reply(text_response(text))),
            },
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
            requests.push(request);
            requests.len()
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.next_step() {
            Some(ScriptStep::Reply(mut response)) => {
                debug!(call, tool_calls = response.message.tool_calls.len(), "Scripted reply");
                response.model = self.model.clone();
                Ok(response)
            }
            Some(ScriptStep::Fail(e)) => Err(e),
            None => Err(ProviderError::ApiError {
                status_code: 500,
                message: format!("scripted provider exhausted at call #{call}"),
            }),
        }
    }

    fn as_embedder(&self) -> Option<&dyn Embedder> {
        self.embedding_dims.map(|_| self as &dyn Embedder)
    }
}

#[async_trait]
impl Embedder for ScriptedProvider {
    /// Hash each lowercase word into a bucket and L2-normalize.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let dims = self
            .embedding_dims
            .ok_or_else(|| ProviderError::Embedding("embeddings not enabled".into()))?;
        let mut vector = vec![0.0f32; dims];
        for word in text.split_whitespace() {
            let word: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();
            if word.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            vector[(hasher.finish() % dims as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}
