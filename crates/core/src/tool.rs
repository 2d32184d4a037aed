//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools give the agent the ability to act: read and write files, run
//! commands, ask a human, spawn a helper agent. The agent loop only sees
//! the [`ToolRegistry`]; concrete tools are registered at startup or when
//! an MCP server is (re)loaded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Prefix applied to every tool registered from an MCP server.
pub const MCP_PREFIX: &str = "mcp_";

/// Build the registry name of an MCP-backed tool: `mcp_<server>__<tool>`.
pub fn mcp_tool_name(server: &str, tool: &str) -> String {
    format!("{MCP_PREFIX}{server}__{tool}")
}

/// The outcome of a tool call as the loop feeds it back to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

/// Output of a command run inside a container or a local process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// A per-project command executor (e.g. a running container).
#[async_trait]
pub trait ContainerExecutor: Send + Sync {
    /// Whether the executor can accept commands right now.
    fn is_ready(&self) -> bool;

    /// Run `command` with the given working directory and wall-clock limit.
    async fn exec(
        &self,
        command: &str,
        workdir: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecOutput, ToolError>;
}

/// The triple the policy engine decides on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyScope {
    pub agent_id: String,
    pub task_id: String,
    pub team_id: String,
}

/// Verdict of the policy engine for one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyDecision {
    Allow,
    Deny,
    RequireApproval,
}

impl std::str::FromStr for PolicyDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            "require_approval" => Ok(Self::RequireApproval),
            other => Err(format!("unknown policy action '{other}'")),
        }
    }
}

/// Decides whether a tool may run in a given scope.
pub trait PolicyEngine: Send + Sync {
    fn decide(&self, scope: &PolicyScope, tool_name: &str) -> PolicyDecision;
}

/// Ambient request context handed to every tool execution.
///
/// Carries the identity triple for policy decisions, the project's workspace,
/// an optional container executor and the cancellation handle of the task.
#[derive(Clone, Default)]
pub struct ToolContext {
    pub agent_id: String,
    pub agent_name: String,
    pub task_id: String,
    pub team_id: String,
    pub project_id: String,
    pub workspace: Option<PathBuf>,
    pub container: Option<Arc<dyn ContainerExecutor>>,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn scope(&self) -> PolicyScope {
        PolicyScope {
            agent_id: self.agent_id.clone(),
            task_id: self.task_id.clone(),
            team_id: self.team_id.clone(),
        }
    }

    /// Resolve a tool-supplied path against the workspace, if any.
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        match &self.workspace {
            Some(root) if candidate.is_relative() => root.join(candidate),
            _ => candidate,
        }
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("agent_id", &self.agent_id)
            .field("task_id", &self.task_id)
            .field("team_id", &self.team_id)
            .field("project_id", &self.project_id)
            .field("workspace", &self.workspace)
            .field("container", &self.container.is_some())
            .finish()
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "shell", "file_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Exposes an MCP server tool under its namespaced registry name.
struct NamespacedTool {
    name: String,
    inner: Arc<dyn Tool>,
}

#[async_trait]
impl Tool for NamespacedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.inner.parameters_schema()
    }

    async fn execute(
        &self,
        ctx: &ToolContext,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        self.inner.execute(ctx, arguments).await
    }
}

/// A shared registry of available tools.
///
/// Read-mostly: lookups take a read lock only long enough to clone the
/// tool handle, so registration (including MCP hot reload) never waits
/// on a running tool.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    mcp_servers: RwLock<HashMap<String, Vec<String>>>,
    policy: Option<Arc<dyn PolicyEngine>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            mcp_servers: RwLock::new(HashMap::new()),
            policy: None,
        }
    }

    /// Consult `policy` before every execution.
    pub fn with_policy(mut self, policy: Arc<dyn PolicyEngine>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, tool);
    }

    /// Register every tool of an MCP server under `mcp_<server>__<tool>`.
    pub fn register_mcp(&self, server: &str, tools: Vec<Arc<dyn Tool>>) {
        let mut names = Vec::with_capacity(tools.len());
        {
            let mut registry = self.tools.write().unwrap_or_else(PoisonError::into_inner);
            for tool in tools {
                let name = mcp_tool_name(server, tool.name());
                names.push(name.clone());
                registry.insert(
                    name.clone(),
                    Arc::new(NamespacedTool { name, inner: tool }),
                );
            }
        }
        debug!(server, count = names.len(), "Registered MCP tools");
        self.mcp_servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(server.to_string(), names);
    }

    /// Remove every tool previously registered for an MCP server.
    pub fn unregister_mcp(&self, server: &str) -> usize {
        let names = self
            .mcp_servers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(server)
            .unwrap_or_default();
        let mut registry = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        names.iter().filter(|n| registry.remove(*n).is_some()).count()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// All tool definitions, sorted by name so the model sees a stable order.
    pub fn all_defs(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|t| t.to_definition())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// List all registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a tool, check policy for the context's scope, then run it.
    ///
    /// A `deny` verdict is an execution error. Cancellation of the context
    /// aborts the running tool with [`ToolError::Cancelled`].
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<serde_json::Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        if let Some(policy) = &self.policy {
            match policy.decide(&ctx.scope(), name) {
                PolicyDecision::Allow => {}
                PolicyDecision::Deny => {
                    return Err(ToolError::PermissionDenied {
                        tool_name: name.to_string(),
                        reason: "denied by tool policy".into(),
                    });
                }
                PolicyDecision::RequireApproval => {
                    debug!(tool = name, "Policy requires approval; executing without gate");
                }
            }
        }

        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled),
            result = tool.execute(ctx, arguments) => result,
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
