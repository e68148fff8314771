// ABOUTME: HTTP API layer for Corral providing REST endpoints and SSE streaming
// ABOUTME: Wires the coordinator, sandbox pool, and budget guard into axum routes

use axum::routing::{delete, get, post};
use axum::Router;
use corral_budget::BudgetGuard;
use corral_executions::ExecutionCoordinator;
use corral_sandbox::SandboxPool;
use std::sync::Arc;
use std::time::Duration;

pub mod execution_handlers;
pub mod response;
pub mod sandbox_handlers;
pub mod sse;
pub mod stream_handlers;

/// Shared state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ExecutionCoordinator>,
    pub sandboxes: Arc<SandboxPool>,
    pub budget: Arc<BudgetGuard>,
    pub heartbeat_interval: Duration,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sandboxes", delete(sandbox_handlers::close_all_sandboxes))
        .route("/api/sandboxes/count", get(sandbox_handlers::active_sandbox_count))
        .route(
            "/api/sandboxes/{owner_id}",
            post(sandbox_handlers::get_or_start_sandbox)
                .get(sandbox_handlers::get_sandbox_info)
                .delete(sandbox_handlers::close_sandbox),
        )
        .route("/api/executions", post(execution_handlers::start_execution))
        .route("/api/executions/recover", post(execution_handlers::recover_executions))
        .route("/api/executions/{execution_id}", get(execution_handlers::get_execution))
        .route(
            "/api/executions/{execution_id}/steps",
            post(execution_handlers::append_step).get(execution_handlers::list_steps),
        )
        .route(
            "/api/executions/{execution_id}/model",
            post(execution_handlers::run_model_call),
        )
        .route(
            "/api/executions/{execution_id}/command",
            post(execution_handlers::run_command),
        )
        .route(
            "/api/executions/{execution_id}/confirm",
            post(execution_handlers::confirm_execution),
        )
        .route(
            "/api/executions/{execution_id}/reject",
            post(execution_handlers::reject_execution),
        )
        .route(
            "/api/executions/{execution_id}/cancel",
            post(execution_handlers::cancel_execution),
        )
        .route(
            "/api/executions/{execution_id}/complete",
            post(execution_handlers::complete_execution),
        )
        .route("/api/budget/{project_id}", get(execution_handlers::get_budget_ledger))
        .route(
            "/executions/{execution_id}/stream",
            get(stream_handlers::stream_execution),
        )
        .with_state(state)
}
