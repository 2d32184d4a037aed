//! Agent records as stored in the `agents` table.

use serde::{Deserialize, Serialize};

/// Lifecycle status of an agent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
        }
    }

    /// Statuses that count against a parent's sub-agent limit.
    pub fn is_active(&self) -> bool {
        matches!(self, AgentStatus::Busy)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(AgentStatus::Idle),
            "busy" => Ok(AgentStatus::Busy),
            "completed" => Ok(AgentStatus::Completed),
            "failed" => Ok(AgentStatus::Failed),
            other => Err(format!("unknown agent status '{other}'")),
        }
    }
}

/// A durable agent identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Provider alias; empty means "use the default provider"
    #[serde(default)]
    pub provider_alias: String,
    /// Model override; empty means "use the provider's default model"
    #[serde(default)]
    pub model: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub is_lead: bool,
    #[serde(default)]
    pub is_ephemeral: bool,
    /// Set (non-empty) exactly when `is_ephemeral` is true
    #[serde(default)]
    pub parent_agent_id: String,
}

impl AgentRecord {
    /// A new idle, non-ephemeral agent.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: String::new(),
            system_prompt: String::new(),
            provider_alias: String::new(),
            model: String::new(),
            status: AgentStatus::Idle,
            team_id: String::new(),
            is_lead: false,
            is_ephemeral: false,
            parent_agent_id: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            AgentStatus::Idle,
            AgentStatus::Busy,
            AgentStatus::Completed,
            AgentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<AgentStatus>().unwrap(), status);
        }
        assert!("stopped".parse::<AgentStatus>().is_err());
    }

    #[test]
    fn only_busy_agents_are_active() {
        assert!(AgentStatus::Busy.is_active());
        assert!(!AgentStatus::Idle.is_active());
        assert!(!AgentStatus::Completed.is_active());
        assert!(!AgentStatus::Failed.is_active());
    }

    #[test]
    fn new_agent_starts_idle_and_permanent() {
        let agent = AgentRecord::new("a1", "lead");
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(!agent.is_ephemeral);
        assert!(agent.parent_agent_id.is_empty());
    }
}
