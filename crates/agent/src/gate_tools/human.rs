use std::sync::Arc;

use async_trait::async_trait;
use ratchet_core::error::ToolError;
use ratchet_core::tool::{Tool, ToolContext};
use ratchet_gates::{HumanRequest, HumanRequestManager, Urgency};

use super::{REQUEST_HUMAN, gate_failure, optional_str, required_str};

pub struct RequestHumanTool {
    manager: Arc<HumanRequestManager>,
}

impl RequestHumanTool {
    pub fn new(manager: Arc<HumanRequestManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for RequestHumanTool {
    fn name(&self) -> &str {
        REQUEST_HUMAN
    }

    fn description(&self) -> &str {
        "Ask a human for information, a decision or a credential. Use request_type \
         \"token\" with metadata.secret_name to obtain a secret: the value is stored \
         under that name and never shown to you. Blocking requests pause execution \
         until the human answers."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "request_type": {
                    "type": "string",
                    "description": "token, info, binary, ...",
                    "default": "info"
                },
                "title": { "type": "string" },
                "description": { "type": "string" },
                "urgency": {
                    "type": "string",
                    "enum": ["low", "normal", "high", "critical"]
                },
                "metadata": { "type": "object" },
                "blocking": {
                    "type": "boolean",
                    "description": "Wait for the answer (default true)"
                }
            },
            "required": ["title"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let title = required_str(&arguments, "title")?;
        let request_type = match optional_str(&arguments, "request_type").trim() {
            "" => "info",
            other => other,
        };
        let urgency: Urgency = optional_str(&arguments, "urgency")
            .parse()
            .map_err(ToolError::InvalidArguments)?;
        let blocking = arguments
            .get("blocking")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let mut request = HumanRequest::new(&ctx.agent_id, &ctx.task_id, request_type, title);
        request.description = optional_str(&arguments, "description").to_string();
        request.urgency = urgency;
        if let Some(metadata) = arguments.get("metadata").filter(|m| !m.is_null()) {
            request.metadata = metadata.clone();
        }

        let created = self
            .manager
            .create(request)
            .await
            .map_err(|e| gate_failure(REQUEST_HUMAN, e))?;

        Ok(serde_json::json!({
            "request_id": created.id,
            "request_type": created.request_type,
            "blocking": blocking,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_gates::RequestStatus;
    use ratchet_store::Database;

    async fn tool() -> (RequestHumanTool, Arc<HumanRequestManager>) {
        let manager = Arc::new(HumanRequestManager::new(Database::open_in_memory().await.unwrap()));
        (RequestHumanTool::new(manager.clone()), manager)
    }

    #[tokio::test]
    async fn creates_token_request_with_metadata() {
        let (tool, manager) = tool().await;
        let ctx = ToolContext {
            agent_id: "a1".into(),
            task_id: "t1".into(),
            ..Default::default()
        };
        let args = serde_json::json!({
            "request_type": "token",
            "title": "GitHub token",
            "urgency": "high",
            "metadata": {"secret_name": "GH_TOKEN"}
        });
        let result = tool.execute(&ctx, args.as_object().cloned().unwrap()).await.unwrap();
        assert_eq!(result["blocking"], true);
        assert_eq!(result["request_type"], "token");

        let stored = manager.require(result["request_id"].as_str().unwrap()).await.unwrap();
        assert_eq!(stored.secret_name(), Some("GH_TOKEN"));
        assert_eq!(stored.urgency, Urgency::High);
        assert_eq!(stored.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn non_blocking_info_request_defaults() {
        let (tool, _) = tool().await;
        let args = serde_json::json!({"title": "Which region?", "blocking": false});
        let result = tool
            .execute(&ToolContext::default(), args.as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(result["blocking"], false);
        assert_eq!(result["request_type"], "info");
    }

    #[tokio::test]
    async fn unknown_urgency_is_rejected() {
        let (tool, _) = tool().await;
        let args = serde_json::json!({"title": "x", "urgency": "asap"});
        let err = tool
            .execute(&ToolContext::default(), args.as_object().cloned().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
