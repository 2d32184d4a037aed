//! `projects` and `tool_policies` table access.

use ratchet_core::error::StoreError;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::{Database, db_err, now_ts};

/// One stored tool policy rule, as raw strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicyRow {
    pub id: i64,
    pub scope: String,
    pub scope_id: String,
    pub tool_pattern: String,
    pub action: String,
}

impl Database {
    /// Create or update a project.
    pub async fn upsert_project(
        &self,
        id: &str,
        name: &str,
        workspace_path: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, workspace_path, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                workspace_path = excluded.workspace_path
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(workspace_path)
        .bind(now_ts())
        .execute(self.pool())
        .await
        .map_err(db_err("UPSERT project"))?;
        Ok(())
    }

    /// The project's workspace directory, when set.
    pub async fn project_workspace(&self, id: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT workspace_path FROM projects WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.pool())
            .await
            .map_err(db_err("GET project workspace"))?;
        match row {
            Some(row) => {
                let path: String = row
                    .try_get("workspace_path")
                    .map_err(db_err("projects.workspace_path"))?;
                Ok(Some(path).filter(|p| !p.is_empty()))
            }
            None => Ok(None),
        }
    }

    pub async fn insert_tool_policy(
        &self,
        scope: &str,
        scope_id: &str,
        tool_pattern: &str,
        action: &str,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO tool_policies (scope, scope_id, tool_pattern, action, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(scope)
        .bind(scope_id)
        .bind(tool_pattern)
        .bind(action)
        .bind(now_ts())
        .execute(self.pool())
        .await
        .map_err(db_err("INSERT tool policy"))?;
        Ok(result.last_insert_rowid())
    }

    /// All policy rows in insertion order.
    pub async fn list_tool_policies(&self) -> Result<Vec<ToolPolicyRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, scope, scope_id, tool_pattern, action FROM tool_policies ORDER BY id",
        )
        .fetch_all(self.pool())
        .await
        .map_err(db_err("LIST tool policies"))?;

        rows.iter()
            .map(|row| {
                Ok(ToolPolicyRow {
                    id: row.try_get("id").map_err(db_err("tool_policies.id"))?,
                    scope: row.try_get("scope").map_err(db_err("tool_policies.scope"))?,
                    scope_id: row
                        .try_get("scope_id")
                        .map_err(db_err("tool_policies.scope_id"))?,
                    tool_pattern: row
                        .try_get("tool_pattern")
                        .map_err(db_err("tool_policies.tool_pattern"))?,
                    action: row.try_get("action").map_err(db_err("tool_policies.action"))?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn workspace_lookup() {
        let db = Database::open_in_memory().await.unwrap();
        assert_eq!(db.project_workspace("p1").await.unwrap(), None);

        db.upsert_project("p1", "demo", "").await.unwrap();
        assert_eq!(db.project_workspace("p1").await.unwrap(), None);

        db.upsert_project("p1", "demo", "/work/demo").await.unwrap();
        assert_eq!(
            db.project_workspace("p1").await.unwrap().as_deref(),
            Some("/work/demo")
        );
    }

    #[tokio::test]
    async fn policies_keep_insertion_order() {
        let db = Database::open_in_memory().await.unwrap();
        db.insert_tool_policy("global", "", "*", "deny").await.unwrap();
        db.insert_tool_policy("agent", "a1", "shell", "allow").await.unwrap();
        let rows = db.list_tool_policies().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, "deny");
        assert_eq!(rows[1].scope_id, "a1");
    }
}
