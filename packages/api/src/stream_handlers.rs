// ABOUTME: SSE stream gateway for live execution updates
// ABOUTME: Sends a state snapshot, then steps as they are published, plus periodic heartbeats

use crate::response::{ApiError, ApiResponse};
use crate::sse::{create_heartbeat_event, create_sse_event, SubscriptionGuard};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json as ResponseJson, Response};
use corral_executions::{AgentStep, ExecutionState};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Initial `state` event payload: the execution plus its full step log,
/// so a late subscriber can rebuild the timeline before live steps arrive
#[derive(Serialize)]
struct StateSnapshot {
    #[serde(flatten)]
    execution: ExecutionState,
    steps: Vec<AgentStep>,
}

/// Execution ids are `exec-` followed by a url-safe nanoid
fn is_valid_execution_id(id: &str) -> bool {
    match id.strip_prefix("exec-") {
        Some(rest) => {
            !rest.is_empty()
                && rest.len() <= 64
                && rest
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        }
        None => false,
    }
}

pub async fn stream_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Response {
    if !is_valid_execution_id(&execution_id) {
        return (
            StatusCode::BAD_REQUEST,
            ResponseJson(ApiResponse::<()>::error("Malformed execution id".to_string())),
        )
            .into_response();
    }

    // Bridge the event bus into a channel owned by this connection; the
    // guard tears the subscription down when the client goes away.
    let (tx, mut rx) = mpsc::unbounded_channel();
    let bus = state.coordinator.events();
    let token = bus.subscribe(
        &execution_id,
        Arc::new(move |step: &AgentStep| {
            let _ = tx.send(step.clone());
        }),
    );
    let guard = SubscriptionGuard::new(bus, token);

    // Snapshot is taken after subscribing so no step can fall between the
    // two; anything captured twice is dropped by the seq filter below.
    let execution = match state.coordinator.get(&execution_id).await {
        Ok(execution) => execution,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let steps = match state.coordinator.steps(&execution_id).await {
        Ok(steps) => steps,
        Err(e) => return ApiError::from(e).into_response(),
    };
    let mut last_seen = steps.last().map(|s| s.seq).unwrap_or(0);
    let snapshot = StateSnapshot { execution, steps };

    let heartbeat_interval = state.heartbeat_interval;
    debug!("Streaming execution {}", execution_id);

    let stream = async_stream::stream! {
        let _guard = guard;

        match create_sse_event("state", &snapshot) {
            Ok(event) => yield Ok::<Event, Infallible>(event),
            Err(e) => {
                yield Ok(crate::sse::create_error_event(&e.to_string()));
                return;
            }
        }

        let mut ticker = tokio::time::interval(heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                step = rx.recv() => {
                    match step {
                        Some(step) => {
                            // Already delivered inside the snapshot
                            if step.seq <= last_seen {
                                continue;
                            }
                            last_seen = step.seq;
                            if let Ok(event) = create_sse_event("step", &step) {
                                yield Ok(event);
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    yield Ok(create_heartbeat_event());
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_execution_ids() {
        assert!(is_valid_execution_id("exec-V1StGXR8_Z5jdHi6B-myT"));
        assert!(is_valid_execution_id("exec-abc123"));
    }

    #[test]
    fn test_invalid_execution_ids() {
        assert!(!is_valid_execution_id(""));
        assert!(!is_valid_execution_id("exec-"));
        assert!(!is_valid_execution_id("run-abc123"));
        assert!(!is_valid_execution_id("exec-has space"));
        assert!(!is_valid_execution_id("exec-semi;colon"));
        assert!(!is_valid_execution_id(&format!("exec-{}", "a".repeat(65))));
    }
}
