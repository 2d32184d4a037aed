use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ratchet_core::error::{GateError, ToolError};
use ratchet_core::tool::{Tool, ToolContext};
use ratchet_gates::{SpawnRequest, SubAgentManager};

use super::{gate_failure, optional_str, required_str};

pub struct SpawnAgentTool {
    manager: Arc<SubAgentManager>,
}

impl SpawnAgentTool {
    pub fn new(manager: Arc<SubAgentManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        "spawn_agent"
    }

    fn description(&self) -> &str {
        "Spawn an ephemeral sub-agent to work on a sub-task in parallel. \
         Returns the sub-task id; use check_agent or wait_agents for the result."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Short name for the sub-agent" },
                "task": { "type": "string", "description": "What the sub-agent must do" },
                "system_prompt": { "type": "string" }
            },
            "required": ["name", "task"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        if ctx.agent_id.is_empty() {
            return Err(ToolError::InvalidArguments("no calling agent in context".into()));
        }
        let request = SpawnRequest {
            parent_id: ctx.agent_id.clone(),
            name: required_str(&arguments, "name")?.to_string(),
            task: required_str(&arguments, "task")?.to_string(),
            system_prompt: optional_str(&arguments, "system_prompt").to_string(),
            project_id: ctx.project_id.clone(),
        };
        let task_id = self
            .manager
            .spawn_with(request)
            .await
            .map_err(|e| gate_failure("spawn_agent", e))?;
        Ok(serde_json::json!({ "task_id": task_id }))
    }
}

pub struct CheckAgentTool {
    manager: Arc<SubAgentManager>,
}

impl CheckAgentTool {
    pub fn new(manager: Arc<SubAgentManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for CheckAgentTool {
    fn name(&self) -> &str {
        "check_agent"
    }

    fn description(&self) -> &str {
        "Check the status and result of a sub-agent's task without waiting."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "task_id": { "type": "string" } },
            "required": ["task_id"]
        })
    }

    async fn execute(
        &self,
        _ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let task_id = required_str(&arguments, "task_id")?;
        let snapshot = self
            .manager
            .check_task(task_id)
            .await
            .map_err(|e| gate_failure("check_agent", e))?;
        Ok(serde_json::json!({
            "task_id": task_id,
            "status": snapshot.status,
            "result": snapshot.result,
            "error": snapshot.error,
        }))
    }
}

pub struct WaitAgentsTool {
    manager: Arc<SubAgentManager>,
    max_timeout: Duration,
}

impl WaitAgentsTool {
    /// `max_timeout` is both the default and the cap of `timeout_secs`.
    pub fn new(manager: Arc<SubAgentManager>, max_timeout: Duration) -> Self {
        Self {
            manager,
            max_timeout: max_timeout.max(Duration::from_secs(1)),
        }
    }
}

#[async_trait]
impl Tool for WaitAgentsTool {
    fn name(&self) -> &str {
        "wait_agents"
    }

    fn description(&self) -> &str {
        "Wait until the given sub-agent tasks finish and return their results."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task_ids": { "type": "array", "items": { "type": "string" } },
                "timeout_secs": { "type": "integer" }
            },
            "required": ["task_ids"]
        })
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let task_ids: Vec<String> = arguments
            .get("task_ids")
            .and_then(|v| v.as_array())
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| id.as_str())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if task_ids.is_empty() {
            return Err(ToolError::InvalidArguments("'task_ids' must list at least one task".into()));
        }
        let timeout = arguments
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(self.max_timeout)
            .min(self.max_timeout);

        match self.manager.wait_tasks(&ctx.cancel, &task_ids, timeout).await {
            Ok(results) => Ok(serde_json::json!({ "results": results })),
            Err(GateError::WaitTimeout { results }) => Err(ToolError::ExecutionFailed {
                tool_name: "wait_agents".into(),
                reason: format!(
                    "timed out after {}s; results so far: {}",
                    timeout.as_secs(),
                    serde_json::to_string(&results).unwrap_or_default()
                ),
            }),
            Err(e) => Err(gate_failure("wait_agents", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_core::agent::AgentRecord;
    use ratchet_core::task::TaskStatus;
    use ratchet_store::Database;

    async fn setup() -> (Database, Arc<SubAgentManager>) {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_agent(&AgentRecord::new("lead", "Lead")).await.unwrap();
        let manager = Arc::new(
            SubAgentManager::new(db.clone()).with_poll_interval(Duration::from_millis(20)),
        );
        (db, manager)
    }

    fn ctx() -> ToolContext {
        ToolContext {
            agent_id: "lead".into(),
            project_id: "p1".into(),
            ..Default::default()
        }
    }

    fn args(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn spawn_check_and_wait() {
        let (db, manager) = setup().await;
        let spawned = SpawnAgentTool::new(manager.clone())
            .execute(&ctx(), args(serde_json::json!({"name": "tester", "task": "run tests"})))
            .await
            .unwrap();
        let task_id = spawned["task_id"].as_str().unwrap().to_string();
        assert_eq!(db.require_task(&task_id).await.unwrap().project_id, "p1");

        let checked = CheckAgentTool::new(manager.clone())
            .execute(&ctx(), args(serde_json::json!({"task_id": task_id})))
            .await
            .unwrap();
        assert_eq!(checked["status"], "pending");

        db.finish_task(&task_id, TaskStatus::Completed, "all green", "")
            .await
            .unwrap();
        let waited = WaitAgentsTool::new(manager, Duration::from_secs(5))
            .execute(&ctx(), args(serde_json::json!({"task_ids": [task_id]})))
            .await
            .unwrap();
        assert_eq!(waited["results"][&task_id]["result"], "all green");
    }

    #[tokio::test]
    async fn wait_timeout_reports_partial_results() {
        let (_, manager) = setup().await;
        let task_id = manager.spawn("lead", "slow", "never ends", "").await.unwrap();
        let err = WaitAgentsTool::new(manager, Duration::from_secs(1))
            .execute(&ctx(), args(serde_json::json!({"task_ids": [task_id]})))
            .await
            .unwrap_err();
        match err {
            ToolError::ExecutionFailed { reason, .. } => assert!(reason.contains("timeout")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_needs_identity_and_arguments() {
        let (_, manager) = setup().await;
        let tool = SpawnAgentTool::new(manager);
        let err = tool
            .execute(&ToolContext::default(), args(serde_json::json!({"name": "x", "task": "y"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
        let err = tool
            .execute(&ctx(), args(serde_json::json!({"name": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
