//! Builds every long-lived component from an [`AppConfig`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ratchet_agent::{
    AgentLoop, AgentServices, ContainerManager, Dispatcher, SkillManager, StepOutcome, TaskRunner,
    TranscriptRecorder, register_gate_tools,
};
use ratchet_config::AppConfig;
use ratchet_core::tool::ToolRegistry;
use ratchet_core::{CancellationToken, SecretProvider, SseHub};
use ratchet_gates::{ApprovalManager, HumanRequestManager, SubAgentManager, TimeoutReaper};
use ratchet_gateway::GatewayState;
use ratchet_memory::SqliteMemoryStore;
use ratchet_security::{EnvSecretProvider, InMemorySecretProvider, PolicyRule, RulePolicyEngine, SecretGuard};
use ratchet_store::{Database, ToolPolicyRow};
use tracing::{info, warn};

type BoxError = Box<dyn std::error::Error>;

pub struct Runtime {
    pub config: AppConfig,
    pub db: Database,
    pub hub: Arc<SseHub>,
    pub approvals: Arc<ApprovalManager>,
    pub requests: Arc<HumanRequestManager>,
    pub runner: Arc<TaskRunner>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Runtime {
    pub async fn build(config: AppConfig, max_concurrent: usize) -> Result<Self, BoxError> {
        let db_path = config.database.resolved_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&db_path).await?;
        info!(path = %db_path.display(), "Database opened");
        Self::build_with_db(config, db, max_concurrent).await
    }

    pub async fn build_with_db(config: AppConfig, db: Database, max_concurrent: usize) -> Result<Self, BoxError> {
        let guard = Arc::new(SecretGuard::new(secret_provider(&config)?));
        let loaded = if config.secrets.preload.is_empty() {
            guard.load_all_secrets().await
        } else {
            guard.load_secrets(&config.secrets.preload).await
        };
        info!(backend = %config.secrets.backend, loaded, "Secrets loaded into guard");

        let hub = Arc::new(SseHub::new(config.gateway.sse_buffer));
        let gates = &config.gates;
        let approvals = Arc::new(
            ApprovalManager::new(db.clone())
                .with_hub(hub.clone())
                .with_default_timeout_minutes(gates.approval_timeout_minutes)
                .with_poll_interval(gates.poll_interval()),
        );
        let requests = Arc::new(
            HumanRequestManager::new(db.clone())
                .with_hub(hub.clone())
                .with_guard(guard.clone())
                .with_default_timeout_minutes(gates.request_timeout_minutes)
                .with_poll_interval(gates.poll_interval()),
        );
        let subagents = Arc::new(
            SubAgentManager::new(db.clone())
                .with_limits(config.subagents.max_per_parent, config.subagents.max_depth)
                .with_poll_interval(gates.poll_interval()),
        );

        let providers = Arc::new(ratchet_providers::build_from_config(&config.providers));
        info!(aliases = ?providers.list(), default = providers.default_alias(), "Providers registered");

        let policy = load_policy(&db).await?;
        let tools = Arc::new(ToolRegistry::new().with_policy(Arc::new(policy)));
        ratchet_tools::register_builtin_tools(
            &tools,
            Duration::from_secs(config.tools.exec_timeout_secs),
            Duration::from_secs(config.tools.max_exec_timeout_secs),
        );

        let skills = Arc::new(SkillManager::new());
        let skill_count = skills.load_dir(&AppConfig::config_dir().join("skills"));
        if skill_count > 0 {
            info!(count = skill_count, "Skills loaded");
        }

        let services = AgentServices::new()
            .with_db(db.clone())
            .with_providers(providers)
            .with_tools(tools.clone())
            .with_guard(guard.clone())
            .with_transcripts(Arc::new(TranscriptRecorder::new(db.clone()).with_guard(guard)))
            .with_containers(Arc::new(ContainerManager::new()))
            .with_subagents(subagents)
            .with_approvals(approvals.clone())
            .with_human_requests(requests.clone())
            .with_memory(Arc::new(SqliteMemoryStore::new(&db)))
            .with_skills(skills);
        register_gate_tools(
            &tools,
            &services,
            Duration::from_secs(config.subagents.wait_timeout_secs),
        );
        info!(tools = ?tools.names(), "Tools registered");

        let agent_loop = Arc::new(AgentLoop::new(config.agent.clone(), services));
        let runner = Arc::new(TaskRunner::new(db.clone(), agent_loop));
        let dispatcher = Arc::new(Dispatcher::new(
            db.clone(),
            runner.clone(),
            max_concurrent,
            gates.poll_interval(),
        ));

        Ok(Self {
            config,
            db,
            hub,
            approvals,
            requests,
            runner,
            dispatcher,
        })
    }

    /// Run one task to completion. Sub-agent tasks it spawns are dispatched
    /// alongside it; other top-level tasks are left alone.
    pub async fn run_task(&self, task_id: &str, cancel: &CancellationToken) -> Result<StepOutcome, BoxError> {
        let children = Arc::new(
            Dispatcher::new(
                self.db.clone(),
                self.runner.clone(),
                1,
                self.config.gates.poll_interval(),
            )
            .subtasks_only(),
        );
        Ok(children.run_foreground(task_id, cancel).await?)
    }

    /// Run the dispatcher, the timeout reaper and the gateway until `cancel` fires.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), BoxError> {
        let dispatcher = self.dispatcher.clone().start(cancel.clone());
        let reaper = TimeoutReaper::new(
            self.approvals.clone(),
            self.requests.clone(),
            Duration::from_secs(self.config.gates.reaper_interval_secs),
        )
        .start(cancel.clone());

        let state = Arc::new(GatewayState::new(self.hub, self.approvals, self.requests));
        let served = ratchet_gateway::serve(&self.config.gateway, state, cancel.clone()).await;
        cancel.cancel();

        let _ = dispatcher.await;
        let _ = reaper.await;
        served?;
        Ok(())
    }
}

fn secret_provider(config: &AppConfig) -> Result<Arc<dyn SecretProvider>, BoxError> {
    match config.secrets.backend.as_str() {
        "env" => Ok(Arc::new(EnvSecretProvider::new(config.secrets.env_prefix.clone()))),
        "memory" => Ok(Arc::new(InMemorySecretProvider::new())),
        other => Err(format!("unknown secrets backend '{other}'").into()),
    }
}

/// Compile the stored tool policies. Rows that do not parse are skipped.
async fn load_policy(db: &Database) -> Result<RulePolicyEngine, BoxError> {
    let engine = RulePolicyEngine::new();
    for row in db.list_tool_policies().await? {
        match policy_rule(&row).and_then(|rule| engine.add_rule(rule)) {
            Ok(()) => {}
            Err(reason) => warn!(policy_id = row.id, %reason, "Skipping invalid tool policy"),
        }
    }
    info!(rules = engine.len(), "Tool policies loaded");
    Ok(engine)
}

fn policy_rule(row: &ToolPolicyRow) -> Result<PolicyRule, String> {
    Ok(PolicyRule {
        scope: row.scope.parse()?,
        scope_id: row.scope_id.clone(),
        tool_pattern: row.tool_pattern.clone(),
        action: row.action.parse()?,
    })
}

/// Load the config from `path`, or from `~/.ratchet/config.toml` when absent.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, BoxError> {
    let config = match path {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            config
        }
        None => AppConfig::load()?,
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_core::{AgentRecord, TaskRecord, TaskStatus};

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.secrets.backend = "memory".into();
        config
    }

    #[test]
    fn policy_rows_parse_into_rules() {
        let row = ToolPolicyRow {
            id: 1,
            scope: "agent".into(),
            scope_id: "a1".into(),
            tool_pattern: "shell".into(),
            action: "require_approval".into(),
        };
        let rule = policy_rule(&row).unwrap();
        assert_eq!(rule.scope, ratchet_security::RuleScope::Agent);

        let bad = ToolPolicyRow {
            action: "maybe".into(),
            ..row
        };
        assert!(policy_rule(&bad).is_err());
    }

    #[test]
    fn unknown_secret_backend_is_rejected() {
        let mut config = test_config();
        config.secrets.backend = "vault".into();
        assert!(secret_provider(&config).is_err());
    }

    #[tokio::test]
    async fn runtime_runs_a_task_with_the_default_provider() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_agent(&AgentRecord::new("a1", "worker")).await.unwrap();
        let mut task = TaskRecord::new("t1", "Say hello", "Say hello");
        task.assigned_to = "a1".into();
        db.insert_task(&task).await.unwrap();

        let runtime = Runtime::build_with_db(test_config(), db.clone(), 2).await.unwrap();
        let outcome = runtime
            .run_task("t1", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(db.require_task("t1").await.unwrap().status, TaskStatus::Completed);
    }
}
