//! Tools through which the model reaches the gates.
//!
//! - `request_approval` / `request_human` create a pending gate and return
//!   its id; the agent loop does the waiting
//! - `spawn_agent`, `check_agent`, `wait_agents` manage ephemeral sub-agents
//!
//! Every tool takes the caller's identity from the [`ToolContext`].
//!
//! [`ToolContext`]: ratchet_core::tool::ToolContext

mod approval;
mod human;
mod subagents;

use std::sync::Arc;
use std::time::Duration;

use ratchet_core::error::{GateError, ToolError};
use ratchet_core::tool::ToolRegistry;

pub use approval::RequestApprovalTool;
pub use human::RequestHumanTool;
pub use subagents::{CheckAgentTool, SpawnAgentTool, WaitAgentsTool};

use crate::services::AgentServices;

pub const REQUEST_APPROVAL: &str = "request_approval";
pub const REQUEST_HUMAN: &str = "request_human";

/// Register the gate tools whose managers are present in `services`.
/// `wait_timeout` is the default (and maximum) `wait_agents` timeout.
pub fn register_gate_tools(registry: &ToolRegistry, services: &AgentServices, wait_timeout: Duration) {
    if let Some(approvals) = &services.approvals {
        registry.register(Arc::new(RequestApprovalTool::new(approvals.clone())));
    }
    if let Some(requests) = &services.human_requests {
        registry.register(Arc::new(RequestHumanTool::new(requests.clone())));
    }
    if let Some(subagents) = &services.subagents {
        registry.register(Arc::new(SpawnAgentTool::new(subagents.clone())));
        registry.register(Arc::new(CheckAgentTool::new(subagents.clone())));
        registry.register(Arc::new(WaitAgentsTool::new(subagents.clone(), wait_timeout)));
    }
}

pub(crate) fn required_str<'a>(
    arguments: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing '{key}'")))
}

pub(crate) fn optional_str<'a>(
    arguments: &'a serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> &'a str {
    arguments.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

pub(crate) fn gate_failure(tool_name: &str, error: GateError) -> ToolError {
    match error {
        GateError::Cancelled | GateError::WaitCancelled { .. } => ToolError::Cancelled,
        GateError::Invalid(reason) => ToolError::InvalidArguments(reason),
        other => ToolError::ExecutionFailed {
            tool_name: tool_name.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_gates::{ApprovalManager, SubAgentManager};
    use ratchet_store::Database;

    #[tokio::test]
    async fn registers_tools_for_available_managers() {
        let db = Database::open_in_memory().await.unwrap();
        let registry = ToolRegistry::new();
        register_gate_tools(&registry, &AgentServices::new(), Duration::from_secs(60));
        assert!(registry.is_empty());

        let services = AgentServices::new()
            .with_approvals(Arc::new(ApprovalManager::new(db.clone())))
            .with_subagents(Arc::new(SubAgentManager::new(db)));
        register_gate_tools(&registry, &services, Duration::from_secs(60));
        assert_eq!(
            registry.names(),
            vec!["check_agent", "request_approval", "spawn_agent", "wait_agents"]
        );
    }
}
