//! Provider trait: the abstraction over language-model backends.
//!
//! A Provider knows how to send a conversation to a model and get a response
//! back, either as a complete message or as a stream of events.
//!
//! Concrete backends live outside this workspace; the loop only depends on
//! this contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, ToolCall};

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools,
            max_tokens: None,
        }
    }
}

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated assistant message, including any tool calls
    pub message: Message,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,
}

impl ProviderResponse {
    pub fn content(&self) -> &str {
        &self.message.content
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.message.tool_calls
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single event in a streaming response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial content delta
    Text { text: String },
    /// A fully assembled tool call
    ToolCall { call: ToolCall },
    /// End of stream
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

/// Turns text into an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// The core Provider trait.
///
/// The agent loop calls `complete()` without knowing which backend is in use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "anthropic", "mock").
    fn name(&self) -> &str;

    /// The model used when a request does not name one.
    fn default_model(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of response events.
    ///
    /// Default implementation calls `complete()` and replays the result.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> Result<tokio::sync::mpsc::Receiver<Result<StreamEvent, ProviderError>>, ProviderError> {
        let response = self.complete(request).await?;
        let capacity = response.message.tool_calls.len() + 2;
        let (tx, rx) = tokio::sync::mpsc::channel(capacity);
        if !response.message.content.is_empty() {
            let _ = tx
                .send(Ok(StreamEvent::Text {
                    text: response.message.content,
                }))
                .await;
        }
        for call in response.message.tool_calls {
            let _ = tx.send(Ok(StreamEvent::ToolCall { call })).await;
        }
        let _ = tx
            .send(Ok(StreamEvent::Done {
                usage: response.usage,
            }))
            .await;
        Ok(rx)
    }

    /// The provider's embedder, if it advertises one.
    fn as_embedder(&self) -> Option<&dyn Embedder> {
        None
    }
}
