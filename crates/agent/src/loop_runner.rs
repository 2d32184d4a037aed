//! The per-task reasoning loop.
//!
//! One [`AgentLoop::run`] drives one task: it builds the prologue, then
//! alternates model calls and tool execution until the model answers without
//! tool calls, the iteration bound is hit, or a terminal gate outcome stops
//! it. Every message is journaled through the transcript recorder.
//!
//! Two classes of outcome come back:
//! - `Err(..)` for configuration errors and cancellation
//! - `Ok(StepOutcome)` for everything else, including provider failures,
//!   loop detection and gate timeouts

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use ratchet_config::AgentConfig;
use ratchet_core::CancellationToken;
use ratchet_core::agent::AgentRecord;
use ratchet_core::error::{Error, GateError, ProviderError, ToolError};
use ratchet_core::message::{Message, Role, ToolCall};
use ratchet_core::provider::{Provider, ProviderRequest};
use ratchet_core::task::{TaskRecord, TaskStatus};
use ratchet_core::tool::ToolContext;
use ratchet_gates::{ApprovalStatus, RequestStatus};
use tracing::{debug, info, warn};

use crate::context::ContextManager;
use crate::context::estimate_messages_tokens;
use crate::gate_tools::{REQUEST_APPROVAL, REQUEST_HUMAN};
use crate::loop_detector::{LoopDetector, LoopVerdict};
use crate::services::AgentServices;
use crate::transcript::TranscriptEntry;

/// Everything the loop needs to know about the agent and its task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskInput {
    pub agent_id: String,
    pub agent_name: String,
    pub team_id: String,
    pub task_id: String,
    pub description: String,
    pub project_id: String,
    pub system_prompt: String,
    /// Blank means the registry's default alias.
    pub provider_alias: String,
    /// Blank means the provider's default model.
    pub model: String,
}

impl TaskInput {
    pub fn from_records(agent: &AgentRecord, task: &TaskRecord) -> Self {
        let description = if task.description.trim().is_empty() {
            task.title.clone()
        } else {
            task.description.clone()
        };
        Self {
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            team_id: agent.team_id.clone(),
            task_id: task.id.clone(),
            description,
            project_id: task.project_id.clone(),
            system_prompt: agent.system_prompt.clone(),
            provider_alias: agent.provider_alias.clone(),
            model: agent.model.clone(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub status: TaskStatus,
    pub result: String,
    pub error: String,
    pub iterations: u32,
}

impl StepOutcome {
    pub fn completed(result: impl Into<String>, iterations: u32) -> Self {
        Self {
            status: TaskStatus::Completed,
            result: result.into(),
            error: String::new(),
            iterations,
        }
    }

    pub fn terminal(status: TaskStatus, error: impl Into<String>, iterations: u32) -> Self {
        Self {
            status,
            result: String::new(),
            error: error.into(),
            iterations,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// What one gated tool call turned into.
enum GateOutcome {
    /// Feed this text back to the model.
    Continue { content: String, is_error: bool },
    /// Feed this text back, then stop the run.
    Stop { content: String, outcome: StepOutcome },
}

/// Writes loop messages to the transcript, if a recorder is configured.
/// Write failures are logged and otherwise ignored.
struct Journal<'a> {
    services: &'a AgentServices,
    input: &'a TaskInput,
}

impl Journal<'_> {
    async fn record(&self, iteration: u32, message: &Message) {
        let Some(recorder) = &self.services.transcripts else {
            return;
        };
        let entry = TranscriptEntry::from_message(
            &self.input.agent_id,
            &self.input.task_id,
            &self.input.project_id,
            iteration,
            message,
        );
        if let Err(e) = recorder.record(entry).await {
            warn!(task_id = %self.input.task_id, iteration, error = %e, "Transcript write failed");
        }
    }
}

/// The core agent loop that orchestrates model calls and tool execution.
pub struct AgentLoop {
    config: AgentConfig,
    services: AgentServices,
    context_limit: Option<usize>,
    approval_timeout: Duration,
    request_timeout: Duration,
}

impl AgentLoop {
    pub fn new(config: AgentConfig, services: AgentServices) -> Self {
        Self {
            approval_timeout: config.approval_timeout(),
            request_timeout: config.request_timeout(),
            config,
            services,
            context_limit: None,
        }
    }

    /// Override the configured approval and human-request waits.
    pub fn with_gate_timeouts(mut self, approval: Duration, request: Duration) -> Self {
        self.approval_timeout = approval;
        self.request_timeout = request;
        self
    }

    /// Force the context window size instead of deriving it from the model.
    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = Some(limit);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn services(&self) -> &AgentServices {
        &self.services
    }

    fn max_iterations(&self) -> u32 {
        match self.config.max_iterations {
            0 => AgentConfig::default().max_iterations,
            n => n,
        }
    }

    /// Run one task to a terminal outcome.
    ///
    /// Sub-agents spawned by this agent are cancelled on every exit path.
    pub async fn run(&self, input: &TaskInput, cancel: &CancellationToken) -> Result<StepOutcome, Error> {
        if input.agent_id.trim().is_empty() || input.task_id.trim().is_empty() {
            return Err(Error::config("agent loop needs both an agent id and a task id"));
        }
        let (provider, source) = self.services.resolve_provider(&input.provider_alias)?;
        info!(
            agent_id = %input.agent_id,
            task_id = %input.task_id,
            provider = provider.name(),
            source,
            "Starting agent loop"
        );

        let mut messages = Vec::new();
        let result = self.drive(input, cancel, provider.as_ref(), &mut messages).await;

        if let Some(subagents) = &self.services.subagents {
            match subagents.cancel_children(&input.agent_id).await {
                Ok(0) => {}
                Ok(cancelled) => info!(agent_id = %input.agent_id, cancelled, "Cancelled orphaned sub-agent tasks"),
                Err(e) => warn!(agent_id = %input.agent_id, error = %e, "Failed to cancel sub-agents"),
            }
        }

        match &result {
            Ok(outcome) => {
                if self.config.auto_save_memory {
                    self.save_memory(input, &messages, provider.as_ref()).await;
                }
                info!(
                    task_id = %input.task_id,
                    status = %outcome.status,
                    iterations = outcome.iterations,
                    "Agent loop finished"
                );
            }
            Err(e) => warn!(task_id = %input.task_id, error = %e, "Agent loop aborted"),
        }
        result
    }

    async fn drive(
        &self,
        input: &TaskInput,
        cancel: &CancellationToken,
        provider: &dyn Provider,
        messages: &mut Vec<Message>,
    ) -> Result<StepOutcome, Error> {
        let journal = Journal {
            services: &self.services,
            input,
        };
        let model = if input.model.trim().is_empty() {
            provider.default_model().to_string()
        } else {
            input.model.clone()
        };
        let tool_ctx = self.tool_context(input, cancel).await;

        let system_prompt = self.system_prompt(input, provider, cancel).await;
        messages.push(Message::system(system_prompt));
        messages.push(Message::user(format!(
            "Task for agent \"{}\":\n\n{}",
            input.agent_name, input.description
        )));
        for message in messages.iter() {
            journal.record(0, message).await;
        }

        let tool_defs = self
            .services
            .tools
            .as_ref()
            .map(|t| t.all_defs())
            .unwrap_or_default();
        let mut detector = LoopDetector::new(self.config.loop_detection);
        let mut context = ContextManager::from_config(&model, &self.config.context);
        if let Some(limit) = self.context_limit {
            context = context.with_limit(limit);
        }

        let max_iterations = self.max_iterations();
        let mut iteration = 0u32;
        let mut final_content: Option<String> = None;
        let mut last_content = String::new();

        while iteration < max_iterations {
            iteration += 1;
            debug!(task_id = %input.task_id, iteration, "Agent loop iteration");

            if context.needs_compaction(messages) {
                let before = context.compactions();
                *messages = context.compact(cancel, messages, provider).await?;
                if context.compactions() > before {
                    let note = Message::user(format!(
                        "[SYSTEM] Context compacted (compaction #{}). Estimated usage now {} of {} tokens.",
                        context.compactions(),
                        estimate_messages_tokens(messages),
                        context.limit()
                    ));
                    journal.record(iteration, &note).await;
                }
            }

            if let Some(guard) = &self.services.guard {
                for message in messages.iter_mut() {
                    guard.check_and_redact(message);
                }
            }

            let request = ProviderRequest::new(model.clone(), messages.clone(), tool_defs.clone());
            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                response = provider.complete(request) => response,
            };
            let response = match response {
                Ok(response) => response,
                Err(ProviderError::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    warn!(task_id = %input.task_id, iteration, error = %e, "Provider call failed");
                    return Ok(StepOutcome::terminal(TaskStatus::Failed, e.to_string(), iteration));
                }
            };

            let assistant = response.message;
            journal.record(iteration, &assistant).await;
            last_content = assistant.content.clone();

            if assistant.tool_calls.is_empty() {
                final_content = Some(assistant.content.clone());
                messages.push(assistant);
                break;
            }

            let tool_calls = assistant.tool_calls.clone();
            messages.push(assistant);
            let mut warnings = Vec::new();

            for call in &tool_calls {
                let (content, is_error, stop) = match self.execute_call(&tool_ctx, call, cancel).await? {
                    GateOutcome::Continue { content, is_error } => (content, is_error, None),
                    GateOutcome::Stop { content, outcome } => (content, false, Some(outcome)),
                };
                let content = match &self.services.guard {
                    Some(guard) if guard.contains_secret(&content) => {
                        warn!(task_id = %input.task_id, tool = %call.name, "Tool output carried a known secret");
                        guard.redact(&content)
                    }
                    _ => content,
                };

                let tool_message = Message::tool_result(&call.id, &content);
                journal.record(iteration, &tool_message).await;
                messages.push(tool_message);

                if let Some(mut outcome) = stop {
                    outcome.iterations = iteration;
                    return Ok(outcome);
                }

                detector.record(&call.name, &call.arguments, &content, is_error);
                match detector.check() {
                    LoopVerdict::Ok => {}
                    LoopVerdict::Warning(reason) => {
                        debug!(task_id = %input.task_id, reason = %reason, "Loop warning");
                        warnings.push(Message::user(format!(
                            "[SYSTEM] Possible loop detected: {reason}. Try a different approach."
                        )));
                    }
                    LoopVerdict::Break(reason) => {
                        warn!(task_id = %input.task_id, iteration, reason = %reason, "Loop detected");
                        let note = Message::user(format!("[SYSTEM] Agent loop terminated: {reason}"));
                        journal.record(iteration, &note).await;
                        messages.push(note);
                        return Ok(StepOutcome::terminal(TaskStatus::LoopDetected, reason, iteration));
                    }
                }
            }

            for warning in warnings {
                journal.record(iteration, &warning).await;
                messages.push(warning);
            }
        }

        let result = match final_content {
            Some(content) => content,
            None => {
                warn!(task_id = %input.task_id, max_iterations, "Iteration bound reached");
                last_content
            }
        };
        Ok(StepOutcome::completed(result, iteration))
    }

    async fn tool_context(&self, input: &TaskInput, cancel: &CancellationToken) -> ToolContext {
        let mut workspace = None;
        if !input.project_id.is_empty() {
            if let Some(db) = &self.services.db {
                match db.project_workspace(&input.project_id).await {
                    Ok(path) => workspace = path.filter(|p| !p.is_empty()).map(PathBuf::from),
                    Err(e) => warn!(project_id = %input.project_id, error = %e, "Workspace lookup failed"),
                }
            }
        }
        let container = self
            .services
            .containers
            .as_ref()
            .and_then(|c| c.ready(&input.project_id));

        ToolContext {
            agent_id: input.agent_id.clone(),
            agent_name: input.agent_name.clone(),
            task_id: input.task_id.clone(),
            team_id: input.team_id.clone(),
            project_id: input.project_id.clone(),
            workspace,
            container,
            cancel: cancel.clone(),
        }
    }

    /// The agent's prompt plus skill and memory sections.
    async fn system_prompt(&self, input: &TaskInput, provider: &dyn Provider, cancel: &CancellationToken) -> String {
        let mut prompt = input.system_prompt.clone();

        if let Some(skills) = &self.services.skills {
            let section = skills.prompt_for_agent(&input.agent_id);
            if !section.is_empty() {
                if !prompt.is_empty() {
                    prompt.push_str("\n\n");
                }
                prompt.push_str(&section);
            }
        }

        let limit = self.config.memory_recall_limit;
        let Some(memory) = self.services.memory.as_ref().filter(|_| limit > 0) else {
            return prompt;
        };
        let embedding = match provider.as_embedder() {
            Some(embedder) => tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                vector = embedder.embed(&input.description) => vector
                    .map_err(|e| debug!(error = %e, "Query embedding failed; keyword recall only"))
                    .ok(),
            },
            None => None,
        };
        match memory
            .search(&input.agent_id, &input.description, limit, embedding.as_deref())
            .await
        {
            Ok(entries) if !entries.is_empty() => {
                debug!(count = entries.len(), "Recalled memories for context");
                prompt.push_str("\n\n## Relevant Memory\n");
                for entry in entries {
                    prompt.push_str(&format!("- {}\n", entry.content));
                }
            }
            Ok(_) => {}
            Err(e) => warn!(agent_id = %input.agent_id, error = %e, "Memory recall failed"),
        }
        prompt
    }

    /// Execute one tool call and apply the gate waits of the two gate tools.
    async fn execute_call(
        &self,
        ctx: &ToolContext,
        call: &ToolCall,
        cancel: &CancellationToken,
    ) -> Result<GateOutcome, Error> {
        let result = match &self.services.tools {
            Some(tools) => tools.execute(ctx, &call.name, call.arguments.clone()).await,
            None => Err(ToolError::NotFound(call.name.clone())),
        };
        let raw = match result {
            Ok(value) => serde_json::to_string(&value)?,
            Err(ToolError::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                debug!(tool = %call.name, error = %e, "Tool call failed");
                return Ok(GateOutcome::Continue {
                    content: format!("Error: {e}"),
                    is_error: true,
                });
            }
        };

        match call.name.as_str() {
            REQUEST_APPROVAL => self.await_approval(raw, cancel).await,
            REQUEST_HUMAN => self.await_human(raw, cancel).await,
            _ => Ok(GateOutcome::Continue {
                content: raw,
                is_error: false,
            }),
        }
    }

    async fn await_approval(&self, raw: String, cancel: &CancellationToken) -> Result<GateOutcome, Error> {
        let Some(approvals) = &self.services.approvals else {
            return Ok(GateOutcome::Continue { content: raw, is_error: false });
        };
        let Some(approval_id) = json_str(&raw, "approval_id") else {
            return Ok(GateOutcome::Continue { content: raw, is_error: false });
        };

        let approval = match approvals
            .wait_for_resolution(cancel, &approval_id, self.approval_timeout)
            .await
        {
            Ok(approval) => approval,
            Err(GateError::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                return Ok(GateOutcome::Continue {
                    content: format!("Error: {e}"),
                    is_error: true,
                });
            }
        };

        let comment = match approval.reviewer_comment.trim() {
            "" => String::new(),
            c => format!(" Reviewer comment: {c}"),
        };
        let content = match approval.status {
            ApprovalStatus::Approved => format!("Approval granted for \"{}\".{comment}", approval.action),
            ApprovalStatus::Rejected => format!("Approval rejected for \"{}\".{comment}", approval.action),
            ApprovalStatus::Timeout => {
                let message = format!(
                    "Approval for \"{}\" timed out after {:?}",
                    approval.action, self.approval_timeout
                );
                return Ok(GateOutcome::Stop {
                    content: format!("{message}."),
                    outcome: StepOutcome::terminal(TaskStatus::ApprovalTimeout, message, 0),
                });
            }
            ApprovalStatus::Pending => raw,
        };
        Ok(GateOutcome::Continue { content, is_error: false })
    }

    async fn await_human(&self, raw: String, cancel: &CancellationToken) -> Result<GateOutcome, Error> {
        let Some(requests) = &self.services.human_requests else {
            return Ok(GateOutcome::Continue { content: raw, is_error: false });
        };
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap_or_default();
        let blocking = parsed.get("blocking").and_then(|b| b.as_bool()).unwrap_or(true);
        let request_id = parsed.get("request_id").and_then(|id| id.as_str());
        let (Some(request_id), true) = (request_id, blocking) else {
            return Ok(GateOutcome::Continue { content: raw, is_error: false });
        };

        let request = match requests
            .wait_for_resolution(cancel, request_id, self.request_timeout)
            .await
        {
            Ok(request) => request,
            Err(GateError::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                return Ok(GateOutcome::Continue {
                    content: format!("Error: {e}"),
                    is_error: true,
                });
            }
        };

        let comment = match request.response_comment.trim() {
            "" => String::new(),
            c => format!("\nComment: {c}"),
        };
        let content = match request.status {
            RequestStatus::Resolved => match request.secret_name() {
                Some(name) => format!(
                    "The human provided the requested value and it has been stored in secret \"{name}\". \
                     Read it through the secret provider when you need it; the value is not shown here.{comment}"
                ),
                None => format!(
                    "Human responded to your request. Response: {}{comment}",
                    request.response_data
                ),
            },
            RequestStatus::Cancelled => {
                format!("The human cancelled your request \"{}\".{comment}", request.title)
            }
            RequestStatus::Expired => {
                let message = format!(
                    "Human request \"{}\" expired after {:?} without a response",
                    request.title, self.request_timeout
                );
                return Ok(GateOutcome::Stop {
                    content: format!("{message}."),
                    outcome: StepOutcome::terminal(TaskStatus::RequestExpired, message, 0),
                });
            }
            RequestStatus::Pending => raw,
        };
        Ok(GateOutcome::Continue { content, is_error: false })
    }

    /// Distill the assistant's side of the conversation into memory.
    async fn save_memory(&self, input: &TaskInput, messages: &[Message], provider: &dyn Provider) {
        let Some(memory) = &self.services.memory else {
            return;
        };
        let transcript = messages
            .iter()
            .filter(|m| m.role == Role::Assistant && !m.content.trim().is_empty())
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        if transcript.is_empty() {
            return;
        }
        let transcript = match &self.services.guard {
            Some(guard) => guard.redact(&transcript),
            None => transcript,
        };
        match memory
            .extract_and_save(&input.agent_id, &transcript, provider.as_embedder())
            .await
        {
            Ok(saved) => debug!(agent_id = %input.agent_id, saved, "Saved task memories"),
            Err(e) => warn!(agent_id = %input.agent_id, error = %e, "Memory save failed"),
        }
    }
}

fn json_str(raw: &str, key: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()?
        .get(key)?
        .as_str()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_core::provider::ToolDefinition;
    use ratchet_core::tool::{Tool, ToolRegistry};
    use ratchet_providers::{ScriptStep, ScriptedProvider, text_response, tool_call_response};
    use ratchet_security::{InMemorySecretProvider, SecretGuard};
    use ratchet_store::Database;

    use crate::transcript::TranscriptRecorder;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text argument"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _ctx: &ToolContext,
            arguments: serde_json::Map<String, serde_json::Value>,
        ) -> Result<serde_json::Value, ToolError> {
            Ok(arguments.get("text").cloned().unwrap_or_default())
        }
    }

    fn input() -> TaskInput {
        TaskInput {
            agent_id: "a1".into(),
            agent_name: "Worker".into(),
            task_id: "t1".into(),
            description: "say hello".into(),
            system_prompt: "You are a worker.".into(),
            ..Default::default()
        }
    }

    fn echo_call(id: &str, text: &str) -> ToolCall {
        ToolCall::new(id, "echo", serde_json::json!({ "text": text }))
    }

    fn services(provider: Arc<ScriptedProvider>) -> AgentServices {
        let tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        AgentServices::new()
            .with_fallback_provider(provider)
            .with_tools(Arc::new(tools))
    }

    #[tokio::test]
    async fn missing_identity_is_a_config_error() {
        let provider = Arc::new(ScriptedProvider::always("hi"));
        let agent = AgentLoop::new(AgentConfig::default(), services(provider));
        let err = agent
            .run(&TaskInput::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn missing_provider_is_a_config_error() {
        let agent = AgentLoop::new(AgentConfig::default(), AgentServices::new());
        let err = agent.run(&input(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn text_reply_completes_in_one_iteration() {
        let provider = Arc::new(ScriptedProvider::always("Hello!"));
        let agent = AgentLoop::new(AgentConfig::default(), services(provider.clone()));
        let outcome = agent.run(&input(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, StepOutcome::completed("Hello!", 1));

        let request = &provider.requests()[0];
        assert_eq!(request.messages[0].content, "You are a worker.");
        assert_eq!(request.messages[1].content, "Task for agent \"Worker\":\n\nsay hello");
        let names: Vec<&str> = request.tools.iter().map(|t: &ToolDefinition| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo"]);
    }

    #[tokio::test]
    async fn tool_results_and_errors_are_fed_back() {
        let provider = Arc::new(
            ScriptedProvider::from_responses(vec![
                tool_call_response(
                    "calling",
                    vec![
                        echo_call("c1", "hi"),
                        ToolCall::new("c2", "missing", serde_json::json!({})),
                    ],
                ),
                text_response("done"),
            ]),
        );
        let agent = AgentLoop::new(AgentConfig::default(), services(provider.clone()));
        let outcome = agent.run(&input(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.iterations, 2);

        let second = &provider.requests()[1].messages;
        assert_eq!(second[3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(second[3].content, "\"hi\"");
        assert_eq!(second[4].tool_call_id.as_deref(), Some("c2"));
        assert!(second[4].content.starts_with("Error: "));
    }

    #[tokio::test]
    async fn provider_failure_is_a_failed_outcome() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptStep::Fail(
            ProviderError::ApiError {
                status_code: 503,
                message: "overloaded".into(),
            },
        )]));
        let agent = AgentLoop::new(AgentConfig::default(), services(provider));
        let outcome = agent.run(&input(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome.error.contains("overloaded"));
        assert_eq!(outcome.iterations, 1);
    }

    #[tokio::test]
    async fn iteration_bound_returns_last_content() {
        let provider = Arc::new(ScriptedProvider::new(
            (0..3)
                .map(|i| {
                    ScriptStep::Reply(tool_call_response(
                        &format!("step {i}"),
                        vec![echo_call(&format!("c{i}"), &format!("v{i}"))],
                    ))
                })
                .collect(),
        ));
        let config = AgentConfig {
            max_iterations: 3,
            ..Default::default()
        };
        let agent = AgentLoop::new(config, services(provider.clone()));
        let outcome = agent.run(&input(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, StepOutcome::completed("step 2", 3));
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn cancelled_run_is_an_error() {
        let provider = Arc::new(ScriptedProvider::always("late").with_latency(std::time::Duration::from_secs(30)));
        let agent = AgentLoop::new(AgentConfig::default(), services(provider));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let err = agent.run(&input(), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn secrets_never_reach_the_provider_or_transcript() {
        let db = Database::open_in_memory().await.unwrap();
        let guard = Arc::new(SecretGuard::new(Arc::new(InMemorySecretProvider::new())));
        guard.add_known_secret("API_KEY", "sk-live-123");
        let recorder = Arc::new(TranscriptRecorder::new(db).with_guard(guard.clone()));

        let provider = Arc::new(ScriptedProvider::from_responses(vec![
            tool_call_response("echo it", vec![echo_call("c1", "key is sk-live-123")]),
            text_response("ok"),
        ]));
        let services = services(provider.clone())
            .with_guard(guard.clone())
            .with_transcripts(recorder.clone());
        let mut task = input();
        task.description = "use sk-live-123".into();

        let outcome = AgentLoop::new(AgentConfig::default(), services)
            .run(&task, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.is_completed());

        let requests = provider.requests();
        for request in &requests {
            for message in &request.messages {
                assert!(!guard.contains_secret(&message.content), "{}", message.content);
                let calls = serde_json::to_string(&message.tool_calls).unwrap();
                assert!(!guard.contains_secret(&calls), "{calls}");
            }
        }
        let echoed = &requests[1].messages[2].tool_calls[0];
        assert_eq!(echoed.arguments["text"], "key is [REDACTED:API_KEY]");

        let entries = recorder.get_by_task("t1").await.unwrap();
        assert!(entries.iter().all(|e| !guard.contains_secret(&e.content)));
        assert!(entries.iter().any(|e| e.redacted && e.content.contains("[REDACTED:API_KEY]")));
        let assistant = entries.iter().find(|e| !e.tool_calls.is_empty()).unwrap();
        assert!(assistant.redacted);
        assert_eq!(assistant.tool_calls[0].arguments["text"], "key is [REDACTED:API_KEY]");
    }

    #[test]
    fn task_input_falls_back_to_title() {
        let mut agent = AgentRecord::new("a1", "Worker");
        agent.provider_alias = "fast".into();
        let task = TaskRecord::new("t1", "Write docs", "");
        let input = TaskInput::from_records(&agent, &task);
        assert_eq!(input.description, "Write docs");
        assert_eq!(input.provider_alias, "fast");
    }
}
