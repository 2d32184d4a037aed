use std::sync::Arc;

use async_trait::async_trait;
use ratchet_core::error::ToolError;
use ratchet_core::tool::{Tool, ToolContext};
use ratchet_gates::{Approval, ApprovalManager};

use super::{REQUEST_APPROVAL, gate_failure, optional_str, required_str};

pub struct RequestApprovalTool {
    manager: Arc<ApprovalManager>,
}

impl RequestApprovalTool {
    pub fn new(manager: Arc<ApprovalManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for RequestApprovalTool {
    fn name(&self) -> &str {
        REQUEST_APPROVAL
    }

    fn description(&self) -> &str {
        "Ask a human reviewer to approve a risky action before doing it. \
         Execution pauses until the reviewer approves or rejects."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "description": "What you want to do" },
                "reason": { "type": "string", "description": "Why it is needed" },
                "details": { "description": "Supporting details (text or JSON)" }
            },
            "required": ["action", "reason"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let action = required_str(&arguments, "action")?;
        let reason = optional_str(&arguments, "reason");
        let details = match arguments.get("details") {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };

        let approval = self
            .manager
            .create(Approval::new(&ctx.agent_id, &ctx.task_id, action, reason).with_details(details))
            .await
            .map_err(|e| gate_failure(REQUEST_APPROVAL, e))?;

        Ok(serde_json::json!({
            "approval_id": approval.id,
            "status": approval.status.as_str(),
        }))
    }
}
