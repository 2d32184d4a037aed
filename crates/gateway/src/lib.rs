//! HTTP gateway for Ratchet.
//!
//! Exposes the event hub as a server-sent event stream and lets human
//! reviewers resolve the gates agents are waiting on.
//!
//! Built on Axum; request tracing comes from `tower-http`.

pub mod events;
pub mod review;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{Json, Router, extract::State, routing::get};
use chrono::{DateTime, Utc};
use ratchet_config::GatewayConfig;
use ratchet_core::CancellationToken;
use ratchet_core::event::SseHub;
use ratchet_gates::{ApprovalManager, HumanRequestManager};
use serde::Serialize;
use tracing::info;

/// Shared state of every route.
pub struct GatewayState {
    pub hub: Arc<SseHub>,
    pub approvals: Arc<ApprovalManager>,
    pub requests: Arc<HumanRequestManager>,
    pub start_time: DateTime<Utc>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(hub: Arc<SseHub>, approvals: Arc<ApprovalManager>, requests: Arc<HumanRequestManager>) -> Self {
        Self {
            hub,
            approvals,
            requests,
            start_time: Utc::now(),
        }
    }
}

/// Build the router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/events", get(events::events_handler))
        .merge(review::review_router())
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the gateway until `cancel` fires, then close every SSE stream.
pub async fn serve(config: &GatewayConfig, state: SharedState, cancel: CancellationToken) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let hub = state.hub.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            hub.stop();
        })
        .await?;
    info!("Gateway stopped");
    Ok(())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
    sse_clients: usize,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.start_time).num_seconds(),
        sse_clients: state.hub.client_count(),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use ratchet_security::{InMemorySecretProvider, SecretGuard};
    use ratchet_store::Database;

    pub struct Fixture {
        pub state: SharedState,
        pub guard: Arc<SecretGuard>,
    }

    pub async fn fixture() -> Fixture {
        let db = Database::open_in_memory().await.unwrap();
        let hub = Arc::new(SseHub::default());
        let guard = Arc::new(SecretGuard::new(Arc::new(InMemorySecretProvider::new())));
        let approvals = Arc::new(ApprovalManager::new(db.clone()).with_hub(hub.clone()));
        let requests = Arc::new(
            HumanRequestManager::new(db)
                .with_hub(hub.clone())
                .with_guard(guard.clone()),
        );
        Fixture {
            state: Arc::new(GatewayState::new(hub, approvals, requests)),
            guard,
        }
    }
}
