//! `agents` table access.

use ratchet_core::agent::{AgentRecord, AgentStatus};
use ratchet_core::error::StoreError;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::{Database, db_err, now_ts};

/// Decode an `agents` row.
pub fn row_to_agent(row: &SqliteRow) -> Result<AgentRecord, StoreError> {
    let status_raw: String = row.try_get("status").map_err(db_err("agents.status"))?;
    let status = status_raw
        .parse::<AgentStatus>()
        .map_err(|reason| StoreError::Corrupt {
            table: "agents",
            reason,
        })?;

    Ok(AgentRecord {
        id: row.try_get("id").map_err(db_err("agents.id"))?,
        name: row.try_get("name").map_err(db_err("agents.name"))?,
        role: row.try_get("role").map_err(db_err("agents.role"))?,
        system_prompt: row
            .try_get("system_prompt")
            .map_err(db_err("agents.system_prompt"))?,
        provider_alias: row.try_get("provider").map_err(db_err("agents.provider"))?,
        model: row.try_get("model").map_err(db_err("agents.model"))?,
        status,
        team_id: row.try_get("team_id").map_err(db_err("agents.team_id"))?,
        is_lead: row.try_get("is_lead").map_err(db_err("agents.is_lead"))?,
        is_ephemeral: row
            .try_get("is_ephemeral")
            .map_err(db_err("agents.is_ephemeral"))?,
        parent_agent_id: row
            .try_get("parent_agent_id")
            .map_err(db_err("agents.parent_agent_id"))?,
    })
}

/// Insert an agent, executed on any sqlx executor (pool or transaction).
pub async fn insert_agent_with<'e, E>(executor: E, agent: &AgentRecord) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    if agent.is_ephemeral && agent.parent_agent_id.is_empty() {
        return Err(StoreError::Corrupt {
            table: "agents",
            reason: format!("ephemeral agent {} has no parent", agent.id),
        });
    }

    sqlx::query(
        r#"
        INSERT INTO agents (id, name, role, system_prompt, provider, model, status,
                            team_id, is_lead, is_ephemeral, parent_agent_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(&agent.id)
    .bind(&agent.name)
    .bind(&agent.role)
    .bind(&agent.system_prompt)
    .bind(&agent.provider_alias)
    .bind(&agent.model)
    .bind(agent.status.as_str())
    .bind(&agent.team_id)
    .bind(agent.is_lead)
    .bind(agent.is_ephemeral)
    .bind(&agent.parent_agent_id)
    .bind(now_ts())
    .execute(executor)
    .await
    .map_err(db_err("INSERT agent"))?;
    Ok(())
}

impl Database {
    pub async fn insert_agent(&self, agent: &AgentRecord) -> Result<(), StoreError> {
        insert_agent_with(self.pool(), agent).await
    }

    pub async fn get_agent(&self, id: &str) -> Result<Option<AgentRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM agents WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err("GET agent"))?;
        row.as_ref().map(row_to_agent).transpose()
    }

    /// Fetch an agent or fail with `NotFound`.
    pub async fn require_agent(&self, id: &str) -> Result<AgentRecord, StoreError> {
        self.get_agent(id).await?.ok_or_else(|| StoreError::NotFound {
            kind: "agent",
            id: id.to_string(),
        })
    }

    pub async fn set_agent_status(&self, id: &str, status: AgentStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE agents SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(db_err("UPDATE agent status"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Ephemeral children of `parent_id`, oldest first.
    pub async fn list_children(&self, parent_id: &str) -> Result<Vec<AgentRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM agents WHERE parent_agent_id = ?1 AND is_ephemeral = 1 \
             ORDER BY created_at, rowid",
        )
        .bind(parent_id)
        .fetch_all(self.pool())
        .await
        .map_err(db_err("LIST children"))?;
        rows.iter().map(row_to_agent).collect()
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM agents ORDER BY created_at, rowid")
            .fetch_all(self.pool())
            .await
            .map_err(db_err("LIST agents"))?;
        rows.iter().map(row_to_agent).collect()
    }
}
