//! Approval gate.
//!
//! An agent files an approval for a risky action; a reviewer approves or
//! rejects it out of band (HTTP, CLI); the agent loop polls until the row
//! leaves `pending` or its wall-clock budget runs out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ratchet_core::error::{GateError, StoreError};
use ratchet_core::event::{self, SseHub};
use ratchet_core::CancellationToken;
use ratchet_store::{Database, db_err, format_ts, parse_ts};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{DEFAULT_POLL_INTERVAL, next_poll};

/// Default lifetime of a pending approval.
pub const DEFAULT_TIMEOUT_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != Self::Pending
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "timeout" => Ok(Self::Timeout),
            other => Err(format!("unknown approval status '{other}'")),
        }
    }
}

/// One row of the `approvals` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    pub agent_id: String,
    pub task_id: String,
    /// What the agent wants to do
    pub action: String,
    pub reason: String,
    #[serde(default)]
    pub details: String,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub reviewer_comment: String,
    /// Zero means "use the manager's default" at creation time
    pub timeout_minutes: i64,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Approval {
    pub fn new(
        agent_id: impl Into<String>,
        task_id: impl Into<String>,
        action: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            action: action.into(),
            reason: reason.into(),
            details: String::new(),
            status: ApprovalStatus::Pending,
            reviewer_comment: String::new(),
            timeout_minutes: 0,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = details.into();
        self
    }
}

fn row_to_approval(row: &SqliteRow) -> Result<Approval, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        table: "approvals",
        reason,
    };
    let status: String = row.try_get("status").map_err(db_err("approvals.status"))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(db_err("approvals.created_at"))?;
    let resolved_at: Option<String> = row
        .try_get("resolved_at")
        .map_err(db_err("approvals.resolved_at"))?;

    Ok(Approval {
        id: row.try_get("id").map_err(db_err("approvals.id"))?,
        agent_id: row.try_get("agent_id").map_err(db_err("approvals.agent_id"))?,
        task_id: row.try_get("task_id").map_err(db_err("approvals.task_id"))?,
        action: row.try_get("action").map_err(db_err("approvals.action"))?,
        reason: row.try_get("reason").map_err(db_err("approvals.reason"))?,
        details: row.try_get("details").map_err(db_err("approvals.details"))?,
        status: status.parse().map_err(corrupt)?,
        reviewer_comment: row
            .try_get("reviewer_comment")
            .map_err(db_err("approvals.reviewer_comment"))?,
        timeout_minutes: row
            .try_get("timeout_minutes")
            .map_err(db_err("approvals.timeout_minutes"))?,
        created_at: parse_ts(&created_at).map_err(corrupt)?,
        resolved_at: resolved_at
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(corrupt)?,
    })
}

/// Creates, resolves and waits on approvals.
pub struct ApprovalManager {
    db: Database,
    hub: Option<Arc<SseHub>>,
    default_timeout_minutes: i64,
    poll_interval: Duration,
}

impl ApprovalManager {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            hub: None,
            default_timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Push `approval_requested` / `approval_resolved` to observers.
    pub fn with_hub(mut self, hub: Arc<SseHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn with_default_timeout_minutes(mut self, minutes: i64) -> Self {
        if minutes > 0 {
            self.default_timeout_minutes = minutes;
        }
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.poll_interval = interval;
        }
        self
    }

    fn broadcast(&self, event_type: &str, approval: &Approval) {
        if let Some(hub) = &self.hub {
            hub.broadcast_json(event_type, approval);
        }
    }

    /// Persist a new pending approval. Assigns an id and the default
    /// timeout when the caller left them empty.
    pub async fn create(&self, mut approval: Approval) -> Result<Approval, GateError> {
        if approval.action.trim().is_empty() {
            return Err(GateError::Invalid("approval action must not be empty".into()));
        }
        if approval.id.is_empty() {
            approval.id = Uuid::new_v4().to_string();
        }
        if approval.timeout_minutes <= 0 {
            approval.timeout_minutes = self.default_timeout_minutes;
        }
        approval.status = ApprovalStatus::Pending;
        approval.reviewer_comment.clear();
        approval.resolved_at = None;
        approval.created_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO approvals (id, agent_id, task_id, action, reason, details, status,
                                   reviewer_comment, timeout_minutes, created_at, resolved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', '', ?7, ?8, NULL)
            "#,
        )
        .bind(&approval.id)
        .bind(&approval.agent_id)
        .bind(&approval.task_id)
        .bind(&approval.action)
        .bind(&approval.reason)
        .bind(&approval.details)
        .bind(approval.timeout_minutes)
        .bind(format_ts(approval.created_at))
        .execute(self.db.pool())
        .await
        .map_err(db_err("INSERT approval"))?;

        info!(
            approval_id = %approval.id,
            agent_id = %approval.agent_id,
            action = %approval.action,
            "Approval requested"
        );
        self.broadcast(event::APPROVAL_REQUESTED, &approval);
        Ok(approval)
    }

    /// Approve a pending approval. Returns false if it was already resolved.
    pub async fn approve(&self, id: &str, comment: &str) -> Result<bool, GateError> {
        self.resolve(id, ApprovalStatus::Approved, comment).await
    }

    /// Reject a pending approval. Returns false if it was already resolved.
    pub async fn reject(&self, id: &str, comment: &str) -> Result<bool, GateError> {
        self.resolve(id, ApprovalStatus::Rejected, comment).await
    }

    async fn resolve(
        &self,
        id: &str,
        status: ApprovalStatus,
        comment: &str,
    ) -> Result<bool, GateError> {
        let result = sqlx::query(
            "UPDATE approvals SET status = ?1, reviewer_comment = ?2, resolved_at = ?3 \
             WHERE id = ?4 AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(comment)
        .bind(format_ts(Utc::now()))
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(db_err("RESOLVE approval"))?;

        if result.rows_affected() == 0 {
            // Distinguish "already resolved" from "no such approval".
            self.require(id).await?;
            debug!(approval_id = id, "Approval already resolved; ignoring");
            return Ok(false);
        }

        info!(approval_id = id, status = %status, "Approval resolved");
        if let Some(approval) = self.get(id).await? {
            self.broadcast(event::APPROVAL_RESOLVED, &approval);
        }
        Ok(true)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Approval>, GateError> {
        let row = sqlx::query("SELECT * FROM approvals WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(db_err("GET approval"))?;
        Ok(row.as_ref().map(row_to_approval).transpose()?)
    }

    pub async fn require(&self, id: &str) -> Result<Approval, GateError> {
        self.get(id).await?.ok_or_else(|| GateError::NotFound {
            kind: "approval",
            id: id.to_string(),
        })
    }

    /// Pending approvals, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<Approval>, GateError> {
        let rows = sqlx::query(
            "SELECT * FROM approvals WHERE status = 'pending' ORDER BY created_at, rowid",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err("LIST pending approvals"))?;
        Ok(rows
            .iter()
            .map(row_to_approval)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Mark every pending approval older than its timeout as `timeout`.
    pub async fn check_timeout(&self) -> Result<u64, GateError> {
        self.check_timeout_at(Utc::now()).await
    }

    /// [`check_timeout`](Self::check_timeout) against an explicit clock.
    pub async fn check_timeout_at(&self, now: DateTime<Utc>) -> Result<u64, GateError> {
        let now = format_ts(now);
        let result = sqlx::query(
            "UPDATE approvals SET status = 'timeout', resolved_at = ?1 \
             WHERE status = 'pending' \
               AND julianday(created_at) + timeout_minutes / 1440.0 <= julianday(?1)",
        )
        .bind(&now)
        .execute(self.db.pool())
        .await
        .map_err(db_err("TIMEOUT approvals"))?;

        let expired = result.rows_affected();
        if expired > 0 {
            info!(count = expired, "Approvals timed out");
        }
        Ok(expired)
    }

    /// Poll until the approval is resolved.
    ///
    /// When `wall_timeout` elapses first the row is moved to `timeout` (if
    /// it is still pending) and an approval with that status is returned.
    /// Cancellation returns [`GateError::Cancelled`] and leaves the row alone.
    pub async fn wait_for_resolution(
        &self,
        cancel: &CancellationToken,
        id: &str,
        wall_timeout: Duration,
    ) -> Result<Approval, GateError> {
        let deadline = tokio::time::Instant::now() + wall_timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(GateError::Cancelled);
            }
            let approval = self.require(id).await?;
            if approval.status.is_terminal() {
                return Ok(approval);
            }
            if tokio::time::Instant::now() >= deadline {
                return self.expire(approval).await;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GateError::Cancelled),
                _ = tokio::time::sleep(next_poll(self.poll_interval, deadline)) => {}
            }
        }
    }

    async fn expire(&self, mut approval: Approval) -> Result<Approval, GateError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE approvals SET status = 'timeout', resolved_at = ?1 \
             WHERE id = ?2 AND status = 'pending'",
        )
        .bind(format_ts(now))
        .bind(&approval.id)
        .execute(self.db.pool())
        .await
        .map_err(db_err("EXPIRE approval"))?;

        if result.rows_affected() == 0 {
            // A reviewer won the race; report what they decided.
            return self.require(&approval.id).await;
        }

        info!(approval_id = %approval.id, "Approval wait timed out");
        approval.status = ApprovalStatus::Timeout;
        approval.resolved_at = Some(now);
        self.broadcast(event::APPROVAL_RESOLVED, &approval);
        Ok(approval)
    }
}
