//! The services an agent loop may use, each optional.
//!
//! The loop degrades gracefully: without a transcript recorder nothing is
//! journaled, without an approval manager `request_approval` results pass
//! through unchanged, and so on. Only a provider is mandatory.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use ratchet_core::error::Error;
use ratchet_core::memory::MemoryStore;
use ratchet_core::provider::Provider;
use ratchet_core::tool::{ContainerExecutor, ToolRegistry};
use ratchet_gates::{ApprovalManager, HumanRequestManager, SubAgentManager};
use ratchet_providers::ProviderRegistry;
use ratchet_security::SecretGuard;
use ratchet_store::Database;
use tracing::debug;

use crate::skills::SkillManager;
use crate::transcript::TranscriptRecorder;

/// Project id → container executor.
#[derive(Default)]
pub struct ContainerManager {
    executors: Mutex<HashMap<String, Arc<dyn ContainerExecutor>>>,
}

impl ContainerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, project_id: impl Into<String>, executor: Arc<dyn ContainerExecutor>) {
        self.executors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(project_id.into(), executor);
    }

    pub fn remove(&self, project_id: &str) -> bool {
        self.executors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(project_id)
            .is_some()
    }

    pub fn get(&self, project_id: &str) -> Option<Arc<dyn ContainerExecutor>> {
        self.executors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project_id)
            .cloned()
    }

    /// The project's executor, only when it is ready for commands.
    pub fn ready(&self, project_id: &str) -> Option<Arc<dyn ContainerExecutor>> {
        self.get(project_id).filter(|e| e.is_ready())
    }
}

#[derive(Clone, Default)]
pub struct AgentServices {
    pub db: Option<Database>,
    pub providers: Option<Arc<ProviderRegistry>>,
    /// Used when the registry cannot resolve the agent's alias.
    pub fallback_provider: Option<Arc<dyn Provider>>,
    pub tools: Option<Arc<ToolRegistry>>,
    pub guard: Option<Arc<SecretGuard>>,
    pub transcripts: Option<Arc<TranscriptRecorder>>,
    pub containers: Option<Arc<ContainerManager>>,
    pub subagents: Option<Arc<SubAgentManager>>,
    pub approvals: Option<Arc<ApprovalManager>>,
    pub human_requests: Option<Arc<HumanRequestManager>>,
    pub memory: Option<Arc<dyn MemoryStore>>,
    pub skills: Option<Arc<SkillManager>>,
}

impl AgentServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_db(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    pub fn with_providers(mut self, providers: Arc<ProviderRegistry>) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn with_fallback_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.fallback_provider = Some(provider);
        self
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_guard(mut self, guard: Arc<SecretGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn with_transcripts(mut self, transcripts: Arc<TranscriptRecorder>) -> Self {
        self.transcripts = Some(transcripts);
        self
    }

    pub fn with_containers(mut self, containers: Arc<ContainerManager>) -> Self {
        self.containers = Some(containers);
        self
    }

    pub fn with_subagents(mut self, subagents: Arc<SubAgentManager>) -> Self {
        self.subagents = Some(subagents);
        self
    }

    pub fn with_approvals(mut self, approvals: Arc<ApprovalManager>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn with_human_requests(mut self, requests: Arc<HumanRequestManager>) -> Self {
        self.human_requests = Some(requests);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_skills(mut self, skills: Arc<SkillManager>) -> Self {
        self.skills = Some(skills);
        self
    }

    /// Resolve the provider for an agent: registry alias first, then the
    /// fallback. Returns the provider and where it came from.
    pub fn resolve_provider(&self, alias: &str) -> Result<(Arc<dyn Provider>, &'static str), Error> {
        if let Some(registry) = &self.providers {
            match registry.resolve(alias) {
                Ok(provider) => return Ok((provider, "registry")),
                Err(e) => debug!(alias, error = %e, "Registry lookup failed; trying fallback"),
            }
        }
        match &self.fallback_provider {
            Some(provider) => Ok((provider.clone(), "fallback")),
            None => Err(Error::config(format!(
                "no provider available for alias '{alias}'"
            ))),
        }
    }
}
