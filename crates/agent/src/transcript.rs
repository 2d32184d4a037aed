//! Transcript recorder, the append-only journal of every loop message.
//!
//! Content is passed through the secret guard before it is written, and the
//! row is flagged `redacted` when that changed anything. Entries are read
//! back in insertion order (`created_at`, then `rowid`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ratchet_core::error::StoreError;
use ratchet_core::message::{Message, Role, ToolCall};
use ratchet_security::SecretGuard;
use ratchet_store::{Database, db_err, format_ts, parse_ts};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub agent_id: String,
    pub task_id: String,
    #[serde(default)]
    pub project_id: String,
    pub iteration: u32,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub redacted: bool,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    /// An entry for `message`; id and timestamp are assigned on record.
    pub fn from_message(
        agent_id: impl Into<String>,
        task_id: impl Into<String>,
        project_id: impl Into<String>,
        iteration: u32,
        message: &Message,
    ) -> Self {
        Self {
            id: String::new(),
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            project_id: project_id.into(),
            iteration,
            role: message.role,
            content: message.content.clone(),
            tool_calls: message.tool_calls.clone(),
            tool_call_id: message.tool_call_id.clone(),
            redacted: false,
            created_at: Utc::now(),
        }
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<TranscriptEntry, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        table: "transcripts",
        reason,
    };
    let role: String = row.try_get("role").map_err(db_err("transcripts.role"))?;
    let tool_calls: String = row
        .try_get("tool_calls")
        .map_err(db_err("transcripts.tool_calls"))?;
    let iteration: i64 = row
        .try_get("iteration")
        .map_err(db_err("transcripts.iteration"))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(db_err("transcripts.created_at"))?;

    Ok(TranscriptEntry {
        id: row.try_get("id").map_err(db_err("transcripts.id"))?,
        agent_id: row.try_get("agent_id").map_err(db_err("transcripts.agent_id"))?,
        task_id: row.try_get("task_id").map_err(db_err("transcripts.task_id"))?,
        project_id: row
            .try_get("project_id")
            .map_err(db_err("transcripts.project_id"))?,
        iteration: u32::try_from(iteration).map_err(|e| corrupt(format!("iteration: {e}")))?,
        role: role.parse().map_err(corrupt)?,
        content: row.try_get("content").map_err(db_err("transcripts.content"))?,
        tool_calls: serde_json::from_str(&tool_calls)
            .map_err(|e| corrupt(format!("tool_calls: {e}")))?,
        tool_call_id: row
            .try_get("tool_call_id")
            .map_err(db_err("transcripts.tool_call_id"))?,
        redacted: row.try_get("redacted").map_err(db_err("transcripts.redacted"))?,
        created_at: parse_ts(&created_at).map_err(corrupt)?,
    })
}

pub struct TranscriptRecorder {
    db: Database,
    guard: Option<Arc<SecretGuard>>,
}

impl TranscriptRecorder {
    pub fn new(db: Database) -> Self {
        Self { db, guard: None }
    }

    /// Redact content and tool-call arguments through `guard` before writing.
    pub fn with_guard(mut self, guard: Arc<SecretGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Redact, stamp and persist one entry. Returns the stored entry.
    pub async fn record(&self, mut entry: TranscriptEntry) -> Result<TranscriptEntry, StoreError> {
        if let Some(guard) = &self.guard {
            let redacted = guard.redact(&entry.content);
            if redacted != entry.content {
                entry.content = redacted;
                entry.redacted = true;
            }
            if guard.redact_tool_calls(&mut entry.tool_calls) {
                entry.redacted = true;
            }
        }
        if entry.id.is_empty() {
            entry.id = uuid::Uuid::new_v4().to_string();
        }
        entry.created_at = Utc::now();

        let tool_calls = serde_json::to_string(&entry.tool_calls)
            .map_err(|e| StoreError::Database(format!("encoding tool_calls: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO transcripts
                (id, agent_id, task_id, project_id, iteration, role, content,
                 tool_calls, tool_call_id, redacted, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.agent_id)
        .bind(&entry.task_id)
        .bind(&entry.project_id)
        .bind(i64::from(entry.iteration))
        .bind(entry.role.as_str())
        .bind(&entry.content)
        .bind(tool_calls)
        .bind(&entry.tool_call_id)
        .bind(entry.redacted)
        .bind(format_ts(entry.created_at))
        .execute(self.db.pool())
        .await
        .map_err(db_err("INSERT transcript"))?;

        debug!(
            task_id = %entry.task_id,
            iteration = entry.iteration,
            role = %entry.role,
            redacted = entry.redacted,
            "Transcript entry recorded"
        );
        Ok(entry)
    }

    pub async fn get_by_task(&self, task_id: &str) -> Result<Vec<TranscriptEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM transcripts WHERE task_id = ?1 ORDER BY created_at, rowid",
        )
        .bind(task_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err("LIST transcripts by task"))?;
        rows.iter().map(row_to_entry).collect()
    }

    pub async fn get_by_agent(&self, agent_id: &str) -> Result<Vec<TranscriptEntry>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM transcripts WHERE agent_id = ?1 ORDER BY created_at, rowid",
        )
        .bind(agent_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err("LIST transcripts by agent"))?;
        rows.iter().map(row_to_entry).collect()
    }
}
