//! # Ratchet Core
//!
//! Domain types, traits, and error definitions for the Ratchet agent
//! execution core. Every subsystem the agent loop talks to (providers,
//! tools, memory, secrets) is defined as a trait here; implementations live
//! in their respective crates.
//!
//! All crates depend inward on core.

pub mod agent;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod secrets;
pub mod task;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentRecord, AgentStatus};
pub use error::{Error, GateError, MemoryError, ProviderError, Result, SecretError, StoreError, ToolError};
pub use event::{HubSubscription, SseHub};
pub use memory::{MemoryEntry, MemoryStore};
pub use message::{Message, Role, ToolCall};
pub use provider::{Embedder, Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use secrets::SecretProvider;
pub use task::{TaskRecord, TaskSnapshot, TaskStatus};
pub use tool::{
    ContainerExecutor, ExecOutput, PolicyDecision, PolicyEngine, PolicyScope, Tool, ToolContext,
    ToolRegistry, ToolResult,
};
pub use tokio_util::sync::CancellationToken;
