// ABOUTME: HTTP handlers for execution lifecycle management
// ABOUTME: Start, inspect, append steps, model/command dispatch, confirmation, and recovery sweep

use crate::response::{ApiError, ApiResponse};
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json as ResponseJson;
use corral_budget::BudgetLedger;
use corral_executions::{
    AgentStep, ExecutionCreateInput, ExecutionState, ModelRequest, NewStep,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

pub async fn start_execution(
    State(state): State<AppState>,
    ResponseJson(input): ResponseJson<ExecutionCreateInput>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<ExecutionState>>), ApiError> {
    let execution = state.coordinator.start(input).await?;
    info!("Started execution {}", execution.id);
    Ok((StatusCode::CREATED, ResponseJson(ApiResponse::success(execution))))
}

pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<ExecutionState>>, ApiError> {
    let execution = state.coordinator.get(&execution_id).await?;
    Ok(ResponseJson(ApiResponse::success(execution)))
}

pub async fn append_step(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    ResponseJson(new_step): ResponseJson<NewStep>,
) -> Result<(StatusCode, ResponseJson<ApiResponse<AgentStep>>), ApiError> {
    let step = state.coordinator.append_step(&execution_id, new_step).await?;
    Ok((StatusCode::CREATED, ResponseJson(ApiResponse::success(step))))
}

pub async fn list_steps(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<Vec<AgentStep>>>, ApiError> {
    let steps = state.coordinator.steps(&execution_id).await?;
    Ok(ResponseJson(ApiResponse::success(steps)))
}

pub async fn run_model_call(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    ResponseJson(request): ResponseJson<ModelRequest>,
) -> Result<ResponseJson<ApiResponse<serde_json::Value>>, ApiError> {
    let outcome = state.coordinator.run_model_call(&execution_id, request).await?;
    let body = match outcome {
        Some(response) => json!({ "response": response }),
        None => json!({ "pending": "confirmation" }),
    };
    Ok(ResponseJson(ApiResponse::success(body)))
}

#[derive(Deserialize)]
pub struct CommandRequest {
    pub command: Vec<String>,
    #[serde(default)]
    pub bypass_confirmation: bool,
}

pub async fn run_command(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    ResponseJson(request): ResponseJson<CommandRequest>,
) -> Result<ResponseJson<ApiResponse<serde_json::Value>>, ApiError> {
    let outcome = state
        .coordinator
        .run_command(&execution_id, request.command, request.bypass_confirmation)
        .await?;
    let body = match outcome {
        Some(result) => json!({ "result": result }),
        None => json!({ "pending": "confirmation" }),
    };
    Ok(ResponseJson(ApiResponse::success(body)))
}

pub async fn confirm_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<ExecutionState>>, ApiError> {
    let execution = state.coordinator.confirm(&execution_id).await?;
    Ok(ResponseJson(ApiResponse::success(execution)))
}

pub async fn reject_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<ExecutionState>>, ApiError> {
    let execution = state.coordinator.reject(&execution_id).await?;
    Ok(ResponseJson(ApiResponse::success(execution)))
}

pub async fn cancel_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<ExecutionState>>, ApiError> {
    let execution = state.coordinator.cancel(&execution_id).await?;
    Ok(ResponseJson(ApiResponse::success(execution)))
}

pub async fn complete_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<ExecutionState>>, ApiError> {
    let execution = state.coordinator.complete(&execution_id).await?;
    Ok(ResponseJson(ApiResponse::success(execution)))
}

pub async fn recover_executions(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<serde_json::Value>>, ApiError> {
    let recovered = state.coordinator.recover().await?;
    Ok(ResponseJson(ApiResponse::success(json!({ "recovered": recovered }))))
}

pub async fn get_budget_ledger(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<BudgetLedger>>, ApiError> {
    let ledger = state.budget.ledger(&project_id).await?;
    Ok(ResponseJson(ApiResponse::success(ledger)))
}
