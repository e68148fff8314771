// ABOUTME: HTTP handlers for sandbox pool management
// ABOUTME: Get-or-start, info, count, close, and close-all operations

use crate::response::{ApiError, ApiResponse};
use crate::AppState;
use axum::extract::{Path, State};
use axum::response::Json as ResponseJson;
use serde_json::json;
use tracing::info;

pub async fn get_or_start_sandbox(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<serde_json::Value>>, ApiError> {
    info!("Get-or-start sandbox for {}", owner_id);
    let lease = state.sandboxes.get_or_start(&owner_id).await?;
    let info = state.sandboxes.info(&owner_id).await;
    Ok(ResponseJson(ApiResponse::success(json!({
        "sandbox_id": lease.sandbox_id,
        "info": info,
    }))))
}

pub async fn get_sandbox_info(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<corral_sandbox::SandboxInfo>>, ApiError> {
    match state.sandboxes.info(&owner_id).await {
        Some(info) => Ok(ResponseJson(ApiResponse::success(info))),
        None => Err(ApiError::NotFound(format!("No sandbox for {owner_id}"))),
    }
}

pub async fn active_sandbox_count(
    State(state): State<AppState>,
) -> ResponseJson<ApiResponse<serde_json::Value>> {
    let count = state.sandboxes.count().await;
    ResponseJson(ApiResponse::success(json!({ "count": count })))
}

pub async fn close_sandbox(
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
) -> Result<ResponseJson<ApiResponse<serde_json::Value>>, ApiError> {
    let closed = state.sandboxes.close(&owner_id).await?;
    info!("Close sandbox for {}: closed={}", owner_id, closed);
    Ok(ResponseJson(ApiResponse::success(json!({ "closed": closed }))))
}

pub async fn close_all_sandboxes(
    State(state): State<AppState>,
) -> ResponseJson<ApiResponse<serde_json::Value>> {
    let drained = state.sandboxes.close_all().await;
    info!("Drained {} sandbox(es)", drained);
    ResponseJson(ApiResponse::success(json!({ "closed": drained })))
}
