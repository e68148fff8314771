// ABOUTME: SSE helpers and subscription lifetime management for execution streams
// ABOUTME: Event constructors plus an RAII guard that unsubscribes when the client disconnects

use axum::response::sse::Event;
use corral_executions::{EventBus, SubscriptionToken};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

pub fn create_sse_event<T: Serialize>(event_type: &str, data: &T) -> Result<Event, serde_json::Error> {
    let json_data = serde_json::to_string(data)?;
    Ok(Event::default().event(event_type).data(json_data))
}

pub fn create_heartbeat_event() -> Event {
    Event::default().event("heartbeat").data("{}")
}

pub fn create_error_event(message: &str) -> Event {
    let payload = serde_json::json!({ "error": message });
    Event::default().event("error").data(payload.to_string())
}

/// Drops the event-bus subscription when the owning stream is dropped
pub struct SubscriptionGuard {
    bus: Arc<EventBus>,
    token: Option<SubscriptionToken>,
}

impl SubscriptionGuard {
    pub fn new(bus: Arc<EventBus>, token: SubscriptionToken) -> Self {
        Self {
            bus,
            token: Some(token),
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            debug!("SSE client disconnected, unsubscribing");
            self.bus.unsubscribe(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let token = bus.subscribe(
            "exec-1",
            Arc::new(|_: &corral_executions::AgentStep| {}),
        );
        assert_eq!(bus.subscriber_count("exec-1"), 1);

        let guard = SubscriptionGuard::new(bus.clone(), token);
        drop(guard);

        assert_eq!(bus.subscriber_count("exec-1"), 0);
        assert_eq!(bus.tracked_execution_count(), 0);
    }

    #[test]
    fn test_sse_event_serializes_payload() {
        let event = create_sse_event("state", &serde_json::json!({"status": "running"}));
        assert!(event.is_ok());
    }
}
