//! Review endpoints for approvals and human requests.
//!
//! - `GET  /approvals`                    pending approvals
//! - `POST /approvals/{id}/approve`       `{ "comment"? }`
//! - `POST /approvals/{id}/reject`        `{ "comment"? }`
//! - `GET  /human-requests`               pending human requests
//! - `POST /human-requests/{id}/resolve`  `{ "response_data", "comment"?, "resolved_by"? }`
//! - `POST /human-requests/{id}/cancel`   `{ "comment"? }`
//!
//! Resolving a `token` request stores the value in the secret backend; the
//! stored row and every response only ever carry the redacted form.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use ratchet_core::error::GateError;
use ratchet_gates::{Approval, HumanRequest};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::SharedState;

pub fn review_router() -> Router<SharedState> {
    Router::new()
        .route("/approvals", get(list_approvals_handler))
        .route("/approvals/{id}/approve", post(approve_handler))
        .route("/approvals/{id}/reject", post(reject_handler))
        .route("/human-requests", get(list_requests_handler))
        .route("/human-requests/{id}/resolve", post(resolve_handler))
        .route("/human-requests/{id}/cancel", post(cancel_handler))
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { error: message.into() }))
}

fn gate_error(error: GateError) -> ApiError {
    let status = match &error {
        GateError::NotFound { .. } => StatusCode::NOT_FOUND,
        GateError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, error.to_string())
}

/// Parse an optional JSON body; an empty body is the default value.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")))
}

#[derive(Debug, Default, Deserialize)]
struct CommentBody {
    #[serde(default)]
    comment: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResolveBody {
    #[serde(default)]
    response_data: serde_json::Value,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    resolved_by: String,
}

#[derive(Debug, Serialize)]
struct ListResponse<T> {
    items: Vec<T>,
    total: usize,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            total: items.len(),
            items,
        }
    }
}

async fn list_approvals_handler(
    State(state): State<SharedState>,
) -> Result<Json<ListResponse<Approval>>, ApiError> {
    let pending = state.approvals.list_pending().await.map_err(gate_error)?;
    Ok(Json(pending.into()))
}

async fn approve_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Approval>, ApiError> {
    review_approval(&state, &id, &body, true).await
}

async fn reject_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Approval>, ApiError> {
    review_approval(&state, &id, &body, false).await
}

async fn review_approval(
    state: &SharedState,
    id: &str,
    body: &Bytes,
    approve: bool,
) -> Result<Json<Approval>, ApiError> {
    let CommentBody { comment } = parse_body(body)?;
    let existing = state.approvals.require(id).await.map_err(gate_error)?;
    let changed = if approve {
        state.approvals.approve(id, &comment).await
    } else {
        state.approvals.reject(id, &comment).await
    }
    .map_err(gate_error)?;
    if !changed {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("approval {id} is already {}", existing.status.as_str()),
        ));
    }
    info!(approval_id = id, approved = approve, "Approval reviewed over HTTP");
    state.approvals.require(id).await.map(Json).map_err(gate_error)
}

async fn list_requests_handler(
    State(state): State<SharedState>,
) -> Result<Json<ListResponse<HumanRequest>>, ApiError> {
    let pending = state.requests.list_pending().await.map_err(gate_error)?;
    Ok(Json(pending.into()))
}

async fn resolve_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<HumanRequest>, ApiError> {
    let body: ResolveBody = parse_body(&body)?;
    let response_data = match body.response_data {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    };
    let resolved_by = if body.resolved_by.is_empty() {
        "gateway"
    } else {
        body.resolved_by.as_str()
    };

    let changed = state
        .requests
        .resolve(&id, &response_data, &body.comment, resolved_by)
        .await
        .map_err(gate_error)?;
    let request = state.requests.require(&id).await.map_err(gate_error)?;
    if !changed {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("human request {id} is already {}", request.status.as_str()),
        ));
    }
    Ok(Json(request))
}

async fn cancel_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<HumanRequest>, ApiError> {
    let CommentBody { comment } = parse_body(&body)?;
    let changed = state.requests.cancel(&id, &comment).await.map_err(gate_error)?;
    let request = state.requests.require(&id).await.map_err(gate_error)?;
    if !changed {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("human request {id} is already {}", request.status.as_str()),
        ));
    }
    Ok(Json(request))
}
