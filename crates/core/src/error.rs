//! Error types for the Ratchet domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::task::TaskSnapshot;

/// The top-level error type for all Ratchet operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Persistence errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Approval / human request / sub-agent errors ---
    #[error("Gate error: {0}")]
    Gate(#[from] GateError),

    // --- Secret backend errors ---
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Cancellation of the ambient context ---
    #[error("operation cancelled")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this error is (or wraps) a cancellation of the ambient context.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Tool(ToolError::Cancelled) => true,
            Self::Provider(ProviderError::Cancelled) => true,
            Self::Gate(GateError::Cancelled) => true,
            Self::Gate(GateError::WaitCancelled { .. }) => true,
            _ => false,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("request cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Sandbox violation: {0}")]
    SandboxViolation(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("tool execution cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Corrupt row in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("ephemeral agent {parent_id} cannot spawn sub-agents")]
    DepthExceeded { parent_id: String },

    #[error("agent {parent_id} already has {active} active sub-agents (limit {limit})")]
    FanOutExceeded {
        parent_id: String,
        active: usize,
        limit: usize,
    },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("timed out waiting for {} task(s)", pending_count(.results))]
    WaitTimeout {
        results: BTreeMap<String, TaskSnapshot>,
    },

    #[error("wait cancelled")]
    WaitCancelled {
        results: BTreeMap<String, TaskSnapshot>,
    },

    #[error("wait cancelled")]
    Cancelled,
}

fn pending_count(results: &BTreeMap<String, TaskSnapshot>) -> usize {
    results
        .values()
        .filter(|s| s.status == TaskSnapshot::TIMEOUT)
        .count()
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret backend error: {0}")]
    Backend(String),

    #[error("Secret backend '{0}' is read-only")]
    ReadOnly(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::PermissionDenied {
            tool_name: "shell".into(),
            reason: "denied by policy".into(),
        });
        assert!(err.to_string().contains("shell"));
        assert!(err.to_string().contains("policy"));
    }

    #[test]
    fn cancellation_is_detected_through_wrappers() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(Error::Tool(ToolError::Cancelled).is_cancelled());
        assert!(Error::Gate(GateError::Cancelled).is_cancelled());
        assert!(!Error::config("missing provider").is_cancelled());
    }

    #[test]
    fn wait_timeout_counts_only_timed_out_tasks() {
        let mut results = BTreeMap::new();
        results.insert("a".to_string(), TaskSnapshot::timed_out());
        results.insert(
            "b".to_string(),
            TaskSnapshot {
                status: "completed".into(),
                result: "ok".into(),
                error: String::new(),
            },
        );
        let err = GateError::WaitTimeout { results };
        assert_eq!(err.to_string(), "timed out waiting for 1 task(s)");
    }
}
