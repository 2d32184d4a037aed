//! Human-request gate.
//!
//! Same lifecycle as an approval, but the request is typed (`token`, `info`,
//! `binary`, ...) and carries a free-form response. A resolved `token`
//! request whose metadata names a `secret_name` is written straight into the
//! secret backend; only a redacted copy of the response reaches the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ratchet_core::CancellationToken;
use ratchet_core::error::{GateError, StoreError};
use ratchet_core::event::{self, SseHub};
use ratchet_security::SecretGuard;
use ratchet_store::{Database, db_err, format_ts, parse_ts};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{DEFAULT_POLL_INTERVAL, next_poll};

/// Default lifetime of a pending human request.
pub const DEFAULT_TIMEOUT_MINUTES: i64 = 60;

/// Request type whose answer is a credential.
pub const TOKEN_REQUEST: &str = "token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Resolved,
    Cancelled,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self != Self::Pending
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown request status '{other}'")),
        }
    }
}

/// How soon an operator should look at a request. Ordered low → critical.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" | "" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown urgency '{other}'")),
        }
    }
}

/// One row of the `human_requests` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanRequest {
    pub id: String,
    pub agent_id: String,
    pub task_id: String,
    pub request_type: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub urgency: Urgency,
    pub status: RequestStatus,
    /// Always a JSON object
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// JSON text supplied by the responder (redacted for token requests)
    #[serde(default)]
    pub response_data: String,
    #[serde(default)]
    pub response_comment: String,
    #[serde(default)]
    pub resolved_by: String,
    pub timeout_minutes: i64,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl HumanRequest {
    pub fn new(
        agent_id: impl Into<String>,
        task_id: impl Into<String>,
        request_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            request_type: request_type.into(),
            title: title.into(),
            description: String::new(),
            urgency: Urgency::Normal,
            status: RequestStatus::Pending,
            metadata: serde_json::Value::Object(Default::default()),
            response_data: String::new(),
            response_comment: String::new(),
            resolved_by: String::new(),
            timeout_minutes: 0,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// The secret this request's answer should be stored under, if any.
    pub fn secret_name(&self) -> Option<&str> {
        if self.request_type != TOKEN_REQUEST {
            return None;
        }
        self.metadata
            .get("secret_name")
            .and_then(|v| v.as_str())
            .filter(|name| !name.trim().is_empty())
    }
}

/// Pull the credential out of a token response: `{"value": "..."}` or the
/// bare text when the response is not a JSON object.
fn token_value(response_data: &str) -> Option<String> {
    let value = match serde_json::from_str::<serde_json::Value>(response_data) {
        Ok(serde_json::Value::Object(map)) => map
            .get("value")
            .and_then(|v| v.as_str())
            .map(String::from),
        Ok(serde_json::Value::String(s)) => Some(s),
        _ => Some(response_data.trim().to_string()),
    };
    value.filter(|v| !v.is_empty())
}

fn row_to_request(row: &SqliteRow) -> Result<HumanRequest, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        table: "human_requests",
        reason,
    };
    let status: String = row.try_get("status").map_err(db_err("human_requests.status"))?;
    let urgency: String = row
        .try_get("urgency")
        .map_err(db_err("human_requests.urgency"))?;
    let metadata: String = row
        .try_get("metadata")
        .map_err(db_err("human_requests.metadata"))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(db_err("human_requests.created_at"))?;
    let resolved_at: Option<String> = row
        .try_get("resolved_at")
        .map_err(db_err("human_requests.resolved_at"))?;

    Ok(HumanRequest {
        id: row.try_get("id").map_err(db_err("human_requests.id"))?,
        agent_id: row
            .try_get("agent_id")
            .map_err(db_err("human_requests.agent_id"))?,
        task_id: row
            .try_get("task_id")
            .map_err(db_err("human_requests.task_id"))?,
        request_type: row
            .try_get("request_type")
            .map_err(db_err("human_requests.request_type"))?,
        title: row.try_get("title").map_err(db_err("human_requests.title"))?,
        description: row
            .try_get("description")
            .map_err(db_err("human_requests.description"))?,
        urgency: urgency.parse().map_err(corrupt)?,
        status: status.parse().map_err(corrupt)?,
        metadata: serde_json::from_str(&metadata)
            .map_err(|e| corrupt(format!("metadata: {e}")))?,
        response_data: row
            .try_get("response_data")
            .map_err(db_err("human_requests.response_data"))?,
        response_comment: row
            .try_get("response_comment")
            .map_err(db_err("human_requests.response_comment"))?,
        resolved_by: row
            .try_get("resolved_by")
            .map_err(db_err("human_requests.resolved_by"))?,
        timeout_minutes: row
            .try_get("timeout_minutes")
            .map_err(db_err("human_requests.timeout_minutes"))?,
        created_at: parse_ts(&created_at).map_err(corrupt)?,
        resolved_at: resolved_at
            .as_deref()
            .map(parse_ts)
            .transpose()
            .map_err(corrupt)?,
    })
}

/// Creates, resolves and waits on human requests.
pub struct HumanRequestManager {
    db: Database,
    hub: Option<Arc<SseHub>>,
    guard: Option<Arc<SecretGuard>>,
    default_timeout_minutes: i64,
    poll_interval: Duration,
}

impl HumanRequestManager {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            hub: None,
            guard: None,
            default_timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_hub(mut self, hub: Arc<SseHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Secret guard that receives credentials from resolved token requests.
    pub fn with_guard(mut self, guard: Arc<SecretGuard>) -> Self {
        self.guard = Some(guard);
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

    fn broadcast(&self, event_type: &str, request: &HumanRequest) {
        if let Some(hub) = &self.hub {
            hub.broadcast_json(event_type, request);
        }
    }

    pub async fn create(&self, mut request: HumanRequest) -> Result<HumanRequest, GateError> {
        if request.title.trim().is_empty() {
            return Err(GateError::Invalid("request title must not be empty".into()));
        }
        if request.request_type.trim().is_empty() {
            return Err(GateError::Invalid("request type must not be empty".into()));
        }
        if request.metadata.is_null() {
            request.metadata = serde_json::Value::Object(Default::default());
        }
        if !request.metadata.is_object() {
            return Err(GateError::Invalid("request metadata must be a JSON object".into()));
        }
        if request.id.is_empty() {
            request.id = Uuid::new_v4().to_string();
        }
        if request.timeout_minutes <= 0 {
            request.timeout_minutes = self.default_timeout_minutes;
        }
        request.status = RequestStatus::Pending;
        request.response_data.clear();
        request.response_comment.clear();
        request.resolved_by.clear();
        request.resolved_at = None;
        request.created_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO human_requests (id, agent_id, task_id, request_type, title, description,
                                        urgency, status, metadata, timeout_minutes, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9, ?10)
            "#,
        )
        .bind(&request.id)
        .bind(&request.agent_id)
        .bind(&request.task_id)
        .bind(&request.request_type)
        .bind(&request.title)
        .bind(&request.description)
        .bind(request.urgency.as_str())
        .bind(request.metadata.to_string())
        .bind(request.timeout_minutes)
        .bind(format_ts(request.created_at))
        .execute(self.db.pool())
        .await
        .map_err(db_err("INSERT human request"))?;

        info!(
            request_id = %request.id,
            agent_id = %request.agent_id,
            request_type = %request.request_type,
            urgency = request.urgency.as_str(),
            "Human request created"
        );
        self.broadcast(event::HUMAN_REQUEST_CREATED, &request);
        Ok(request)
    }

    /// Answer a pending request. Returns false if it was no longer pending.
    ///
    /// For a token request with a `secret_name`, the stored `response_data`
    /// is the redacted text. The credential is written to the guard's backend
    /// and registered for redaction only once the row has moved to resolved;
    /// if the backend write fails the row stays pending.
    pub async fn resolve(
        &self,
        id: &str,
        response_data: &str,
        comment: &str,
        resolved_by: &str,
    ) -> Result<bool, GateError> {
        let request = self.require(id).await?;

        let mut token = None;
        let mut stored_response = response_data.to_string();
        if let Some(secret_name) = request.secret_name() {
            let guard = self.guard.as_ref().ok_or_else(|| {
                GateError::Invalid("token request needs a secret guard to store its value".into())
            })?;
            let value = token_value(response_data).ok_or_else(|| {
                GateError::Invalid("token response carries no value".into())
            })?;
            stored_response = guard.redact(
                &response_data.replace(value.as_str(), &format!("[REDACTED:{secret_name}]")),
            );
            token = Some((guard, secret_name, value));
        }

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(db_err("BEGIN resolve"))?;
        let result = sqlx::query(
            "UPDATE human_requests \
             SET status = 'resolved', response_data = ?1, response_comment = ?2, \
                 resolved_by = ?3, resolved_at = ?4 \
             WHERE id = ?5 AND status = 'pending'",
        )
        .bind(&stored_response)
        .bind(comment)
        .bind(resolved_by)
        .bind(format_ts(Utc::now()))
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("RESOLVE human request"))?;

        if result.rows_affected() == 0 {
            debug!(request_id = id, "Human request already closed");
            return Ok(false);
        }

        if let Some((guard, secret_name, value)) = token {
            guard
                .provider()
                .set(secret_name, &value)
                .await
                .map_err(|e| GateError::Invalid(format!("storing secret {secret_name}: {e}")))?;
            tx.commit().await.map_err(db_err("COMMIT resolve"))?;
            guard.add_known_secret(secret_name, &value);
            info!(request_id = id, secret = secret_name, "Token stored in secret backend");
        } else {
            tx.commit().await.map_err(db_err("COMMIT resolve"))?;
        }

        info!(request_id = id, resolved_by, "Human request resolved");
        if let Some(resolved) = self.get(id).await? {
            self.broadcast(event::HUMAN_REQUEST_RESOLVED, &resolved);
        }
        Ok(true)
    }

    /// Withdraw a pending request. Returns false if it was no longer pending.
    pub async fn cancel(&self, id: &str, comment: &str) -> Result<bool, GateError> {
        let result = sqlx::query(
            "UPDATE human_requests SET status = 'cancelled', response_comment = ?1, resolved_at = ?2 \
             WHERE id = ?3 AND status = 'pending'",
        )
        .bind(comment)
        .bind(format_ts(Utc::now()))
        .bind(id)
        .execute(self.db.pool())
        .await
        .map_err(db_err("CANCEL human request"))?;

        if result.rows_affected() == 0 {
            self.require(id).await?;
            return Ok(false);
        }
        info!(request_id = id, "Human request cancelled");
        if let Some(cancelled) = self.get(id).await? {
            self.broadcast(event::HUMAN_REQUEST_RESOLVED, &cancelled);
        }
        Ok(true)
    }

    pub async fn get(&self, id: &str) -> Result<Option<HumanRequest>, GateError> {
        let row = sqlx::query("SELECT * FROM human_requests WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(db_err("GET human request"))?;
        Ok(row.as_ref().map(row_to_request).transpose()?)
    }

    pub async fn require(&self, id: &str) -> Result<HumanRequest, GateError> {
        self.get(id).await?.ok_or_else(|| GateError::NotFound {
            kind: "human request",
            id: id.to_string(),
        })
    }

    /// Pending requests, most urgent first, then oldest first.
    pub async fn list_pending(&self) -> Result<Vec<HumanRequest>, GateError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM human_requests
            WHERE status = 'pending'
            ORDER BY CASE urgency
                         WHEN 'critical' THEN 3
                         WHEN 'high' THEN 2
                         WHEN 'normal' THEN 1
                         ELSE 0
                     END DESC,
                     created_at, rowid
            "#,
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(db_err("LIST pending human requests"))?;
        Ok(rows
            .iter()
            .map(row_to_request)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Mark every pending request older than its timeout as `expired`.
    pub async fn check_timeout(&self) -> Result<u64, GateError> {
        self.check_timeout_at(Utc::now()).await
    }

    pub async fn check_timeout_at(&self, now: DateTime<Utc>) -> Result<u64, GateError> {
        let now = format_ts(now);
        let result = sqlx::query(
            "UPDATE human_requests SET status = 'expired', resolved_at = ?1 \
             WHERE status = 'pending' \
               AND julianday(created_at) + timeout_minutes / 1440.0 <= julianday(?1)",
        )
        .bind(&now)
        .execute(self.db.pool())
        .await
        .map_err(db_err("EXPIRE human requests"))?;

        let expired = result.rows_affected();
        if expired > 0 {
            info!(count = expired, "Human requests expired");
        }
        Ok(expired)
    }

    /// Poll until the request leaves `pending`; on wall timeout the row is
    /// moved to `expired`.
    pub async fn wait_for_resolution(
        &self,
        cancel: &CancellationToken,
        id: &str,
        wall_timeout: Duration,
    ) -> Result<HumanRequest, GateError> {
        let deadline = tokio::time::Instant::now() + wall_timeout;
        loop {
            if cancel.is_cancelled() {
                return Err(GateError::Cancelled);
            }
            let request = self.require(id).await?;
            if request.status.is_terminal() {
                return Ok(request);
            }
            if tokio::time::Instant::now() >= deadline {
                return self.expire(request).await;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GateError::Cancelled),
                _ = tokio::time::sleep(next_poll(self.poll_interval, deadline)) => {}
            }
        }
    }

    async fn expire(&self, mut request: HumanRequest) -> Result<HumanRequest, GateError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE human_requests SET status = 'expired', resolved_at = ?1 \
             WHERE id = ?2 AND status = 'pending'",
        )
        .bind(format_ts(now))
        .bind(&request.id)
        .execute(self.db.pool())
        .await
        .map_err(db_err("EXPIRE human request"))?;

        if result.rows_affected() == 0 {
            return self.require(&request.id).await;
        }

        warn!(request_id = %request.id, "Human request wait timed out");
        request.status = RequestStatus::Expired;
        request.resolved_at = Some(now);
        self.broadcast(event::HUMAN_REQUEST_RESOLVED, &request);
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_core::secrets::SecretProvider;
    use ratchet_security::InMemorySecretProvider;

    async fn manager() -> (HumanRequestManager, Arc<SecretGuard>) {
        let db = Database::open_in_memory().await.unwrap();
        let guard = Arc::new(SecretGuard::new(Arc::new(InMemorySecretProvider::new())));
        let mgr = HumanRequestManager::new(db)
            .with_guard(guard.clone())
            .with_poll_interval(Duration::from_millis(20));
        (mgr, guard)
    }

    fn info_request(title: &str, urgency: Urgency) -> HumanRequest {
        let mut req = HumanRequest::new("agent-1", "task-1", "info", title);
        req.urgency = urgency;
        req
    }

    fn token_request() -> HumanRequest {
        let mut req = HumanRequest::new("agent-1", "task-1", TOKEN_REQUEST, "GitHub token");
        req.metadata = serde_json::json!({"secret_name": "GH_TOKEN"});
        req
    }

    #[test]
    fn token_value_accepts_object_or_bare_text() {
        assert_eq!(token_value(r#"{"value":"abc"}"#).as_deref(), Some("abc"));
        assert_eq!(token_value("  raw-token ").as_deref(), Some("raw-token"));
        assert_eq!(token_value(r#""quoted""#).as_deref(), Some("quoted"));
        assert_eq!(token_value(r#"{"other":"x"}"#), None);
    }

    #[test]
    fn secret_name_only_for_token_requests() {
        assert_eq!(token_request().secret_name(), Some("GH_TOKEN"));
        let mut info = info_request("q", Urgency::Low);
        info.metadata = serde_json::json!({"secret_name": "GH_TOKEN"});
        assert_eq!(info.secret_name(), None);
    }

    #[tokio::test]
    async fn create_rejects_missing_title() {
        let (mgr, _) = manager().await;
        let err = mgr.create(info_request(" ", Urgency::Normal)).await.unwrap_err();
        assert!(matches!(err, GateError::Invalid(_)));
    }

    #[tokio::test]
    async fn list_pending_orders_by_urgency_then_age() {
        let (mgr, _) = manager().await;
        let low = mgr.create(info_request("low", Urgency::Low)).await.unwrap();
        let normal = mgr.create(info_request("normal", Urgency::Normal)).await.unwrap();
        let critical = mgr.create(info_request("critical", Urgency::Critical)).await.unwrap();
        let high_a = mgr.create(info_request("high a", Urgency::High)).await.unwrap();
        let high_b = mgr.create(info_request("high b", Urgency::High)).await.unwrap();

        let ids: Vec<String> = mgr
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(
            ids,
            vec![critical.id, high_a.id, high_b.id, normal.id, low.id]
        );
    }

    #[tokio::test]
    async fn token_resolution_stores_secret_and_redacts_row() {
        let (mgr, guard) = manager().await;
        let req = mgr.create(token_request()).await.unwrap();

        assert!(mgr
            .resolve(&req.id, r#"{"value":"ghp_abc123xyz"}"#, "here you go", "alice")
            .await
            .unwrap());

        assert_eq!(
            guard.provider().get("GH_TOKEN").await.unwrap().as_deref(),
            Some("ghp_abc123xyz")
        );
        assert_eq!(guard.redact("use ghp_abc123xyz"), "use [REDACTED:GH_TOKEN]");

        let stored = mgr.require(&req.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Resolved);
        assert_eq!(stored.resolved_by, "alice");
        assert!(!stored.response_data.contains("ghp_abc123xyz"));
    }

    #[tokio::test]
    async fn closed_token_request_stores_no_secret() {
        let (mgr, guard) = manager().await;
        let mut req = token_request();
        req.timeout_minutes = 5;
        let expired = mgr.create(req).await.unwrap();
        let later = Utc::now() + chrono::Duration::minutes(6);
        assert_eq!(mgr.check_timeout_at(later).await.unwrap(), 1);

        let cancelled = mgr.create(token_request()).await.unwrap();
        assert!(mgr.cancel(&cancelled.id, "withdrawn").await.unwrap());

        for id in [&expired.id, &cancelled.id] {
            assert!(!mgr
                .resolve(id, r#"{"value":"ghp_late_token"}"#, "", "erin")
                .await
                .unwrap());
            let stored = mgr.require(id).await.unwrap();
            assert!(stored.status.is_terminal());
            assert!(stored.response_data.is_empty());
        }
        assert_eq!(guard.provider().get("GH_TOKEN").await.unwrap(), None);
        assert!(!guard.contains_secret("ghp_late_token"));
        assert_eq!(guard.redact("ghp_late_token"), "ghp_late_token");
    }

    #[tokio::test]
    async fn token_resolution_without_guard_fails() {
        let db = Database::open_in_memory().await.unwrap();
        let mgr = HumanRequestManager::new(db);
        let req = mgr.create(token_request()).await.unwrap();
        let err = mgr
            .resolve(&req.id, r#"{"value":"secret"}"#, "", "bob")
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Invalid(_)));
        assert_eq!(mgr.require(&req.id).await.unwrap().status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_and_resolve_are_one_shot() {
        let (mgr, _) = manager().await;
        let req = mgr.create(info_request("which branch?", Urgency::Normal)).await.unwrap();
        assert!(mgr.cancel(&req.id, "no longer needed").await.unwrap());
        assert!(!mgr.resolve(&req.id, "\"main\"", "", "carol").await.unwrap());
        assert!(!mgr.cancel(&req.id, "again").await.unwrap());

        let stored = mgr.require(&req.id).await.unwrap();
        assert_eq!(stored.status, RequestStatus::Cancelled);
        assert_eq!(stored.response_comment, "no longer needed");
    }

    #[tokio::test]
    async fn check_timeout_marks_expired() {
        let (mgr, _) = manager().await;
        let mut req = info_request("q", Urgency::Normal);
        req.timeout_minutes = 5;
        let req = mgr.create(req).await.unwrap();

        assert_eq!(mgr.check_timeout().await.unwrap(), 0);
        let later = Utc::now() + chrono::Duration::minutes(6);
        assert_eq!(mgr.check_timeout_at(later).await.unwrap(), 1);
        assert_eq!(mgr.require(&req.id).await.unwrap().status, RequestStatus::Expired);
    }

    #[tokio::test]
    async fn wait_sees_resolution() {
        let (mgr, _) = manager().await;
        let mgr = Arc::new(mgr);
        let req = mgr.create(info_request("which branch?", Urgency::High)).await.unwrap();

        let responder = {
            let mgr = mgr.clone();
            let id = req.id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                mgr.resolve(&id, "\"main\"", "use main", "dave").await.unwrap();
            })
        };

        let resolved = mgr
            .wait_for_resolution(&CancellationToken::new(), &req.id, Duration::from_secs(5))
            .await
            .unwrap();
        responder.await.unwrap();
        assert_eq!(resolved.status, RequestStatus::Resolved);
        assert_eq!(resolved.response_data, "\"main\"");
    }

    #[tokio::test]
    async fn wait_timeout_expires_row() {
        let (mgr, _) = manager().await;
        let req = mgr.create(info_request("q", Urgency::Low)).await.unwrap();
        let result = mgr
            .wait_for_resolution(&CancellationToken::new(), &req.id, Duration::from_millis(60))
            .await
            .unwrap();
        assert_eq!(result.status, RequestStatus::Expired);
        assert_eq!(mgr.require(&req.id).await.unwrap().status, RequestStatus::Expired);
    }
}
