//! `GET /events`: the hub as a server-sent event stream.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::Stream;

use crate::SharedState;

/// Turn a hub wire payload (`event: <type>\ndata: <json>`) back into an
/// axum event.
pub fn to_sse_event(payload: &str) -> SseEvent {
    let (head, data) = payload.split_once('\n').unwrap_or(("", payload));
    let data = data.strip_prefix("data: ").unwrap_or(data);
    match head.strip_prefix("event: ") {
        Some(event_type) => SseEvent::default().event(event_type).data(data),
        None => SseEvent::default().data(data),
    }
}

pub async fn events_handler(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let subscription = state.hub.register();
    tracing::debug!(client_id = subscription.id(), "SSE stream opened");

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let payload = subscription.recv().await?;
        Some((Ok(to_sse_event(&payload)), subscription))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use crate::test_support::fixture;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use ratchet_gates::Approval;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn stream_delivers_gate_events() {
        let fixture = fixture().await;
        let state = fixture.state.clone();
        let response = build_router(fixture.state)
            .oneshot(Request::get("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );
        assert_eq!(state.hub.client_count(), 1);

        state
            .approvals
            .create(Approval::new("a1", "t1", "deploy", "release"))
            .await
            .unwrap();

        let mut body = response.into_body();
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
        assert!(text.contains("event: approval_requested"), "{text}");
        assert!(text.contains("\"action\":\"deploy\""), "{text}");
    }
}
