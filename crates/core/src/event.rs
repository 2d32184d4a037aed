//! Server-sent event hub: fan-out of named events to connected observers.
//!
//! Every client owns a bounded queue. Broadcasting never blocks: when a
//! client's queue is full the event is dropped for that client only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tokio::sync::mpsc;
use tracing::debug;

/// Smallest per-client queue the hub will allocate.
pub const MIN_CLIENT_BUFFER: usize = 64;

pub const APPROVAL_REQUESTED: &str = "approval_requested";
pub const APPROVAL_RESOLVED: &str = "approval_resolved";
pub const HUMAN_REQUEST_CREATED: &str = "human_request_created";
pub const HUMAN_REQUEST_RESOLVED: &str = "human_request_resolved";

/// Format one event as it goes on the wire (without the trailing blank line).
pub fn format_event(event_type: &str, data: &str) -> String {
    format!("event: {event_type}\ndata: {data}")
}

/// Multi-client event broadcaster.
pub struct SseHub {
    clients: RwLock<HashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl SseHub {
    /// Create a hub whose clients each buffer up to `buffer` events
    /// (never fewer than [`MIN_CLIENT_BUFFER`]).
    pub fn new(buffer: usize) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(MIN_CLIENT_BUFFER),
        }
    }

    /// Register a new client. Dropping the subscription deregisters it.
    pub fn register(self: &Arc<Self>) -> HubSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        debug!(client_id = id, "SSE client registered");
        HubSubscription {
            id,
            receiver: rx,
            hub: Arc::downgrade(self),
        }
    }

    /// Remove a client and close its queue.
    pub fn unregister(&self, id: u64) {
        if self
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
        {
            debug!(client_id = id, "SSE client deregistered");
        }
    }

    /// Send `event: <type>\ndata: <data>` to every client without blocking.
    pub fn broadcast_event(&self, event_type: &str, data: &str) {
        let payload = format_event(event_type, data);
        let mut closed = Vec::new();
        {
            let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
            for (id, tx) in clients.iter() {
                match tx.try_send(payload.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(client_id = id, event_type, "SSE client queue full; event dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
                }
            }
        }
        for id in closed {
            self.unregister(id);
        }
    }

    /// Serialize `payload` as JSON and broadcast it.
    pub fn broadcast_json<T: serde::Serialize>(&self, event_type: &str, payload: &T) {
        match serde_json::to_string(payload) {
            Ok(data) => self.broadcast_event(event_type, &data),
            Err(e) => debug!(event_type, error = %e, "SSE payload not serializable"),
        }
    }

    /// Close every queue and forget all clients.
    pub fn stop(&self) {
        self.clients
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for SseHub {
    fn default() -> Self {
        Self::new(MIN_CLIENT_BUFFER)
    }
}

/// A registered client's end of the hub.
pub struct HubSubscription {
    id: u64,
    receiver: mpsc::Receiver<String>,
    hub: Weak<SseHub>,
}

impl HubSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next wire payload, or `None` once the hub closed the queue.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, for draining in tests and flush loops.
    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for HubSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_client_in_order() {
        let hub = Arc::new(SseHub::default());
        let mut a = hub.register();
        let mut b = hub.register();

        hub.broadcast_event(APPROVAL_REQUESTED, r#"{"id":"1"}"#);
        hub.broadcast_event(APPROVAL_RESOLVED, r#"{"id":"1"}"#);

        for sub in [&mut a, &mut b] {
            assert_eq!(
                sub.recv().await.unwrap(),
                "event: approval_requested\ndata: {\"id\":\"1\"}"
            );
            assert_eq!(
                sub.recv().await.unwrap(),
                "event: approval_resolved\ndata: {\"id\":\"1\"}"
            );
        }
    }

    #[tokio::test]
    async fn full_client_drops_events_without_affecting_others() {
        let hub = Arc::new(SseHub::new(MIN_CLIENT_BUFFER));
        let mut slow = hub.register();
        let mut fast = hub.register();

        for i in 0..MIN_CLIENT_BUFFER + 10 {
            hub.broadcast_event("tick", &i.to_string());
            // The fast client keeps up.
            assert_eq!(fast.recv().await.unwrap(), format_event("tick", &i.to_string()));
        }

        let mut received = 0;
        while slow.try_recv().is_some() {
            received += 1;
        }
        assert_eq!(received, MIN_CLIENT_BUFFER);
    }

    #[test]
    fn buffer_has_a_floor() {
        let hub = SseHub::new(1);
        assert_eq!(hub.buffer, MIN_CLIENT_BUFFER);
    }

    #[tokio::test]
    async fn dropping_subscription_deregisters() {
        let hub = Arc::new(SseHub::default());
        let sub = hub.register();
        assert_eq!(hub.client_count(), 1);
        drop(sub);
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn stop_closes_queues() {
        let hub = Arc::new(SseHub::default());
        let mut sub = hub.register();
        hub.stop();
        assert_eq!(hub.client_count(), 0);
        assert!(sub.recv().await.is_none());
    }
}
