// ABOUTME: Shared API response types and error handling
// ABOUTME: Provides a consistent response envelope and HTTP status mapping for domain errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json as ResponseJson};
use corral_executions::CoordinatorError;
use corral_sandbox::PoolError;
use corral_storage::StorageError;
use serde::Serialize;

/// Standard API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> ApiResponse<()> {
        ApiResponse {
            success: false,
            data: None,
            error: Some(message),
        }
    }
}

/// Domain errors surfaced by handlers
pub enum ApiError {
    Coordinator(CoordinatorError),
    Pool(PoolError),
    Storage(StorageError),
    NotFound(String),
    BadRequest(String),
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        ApiError::Coordinator(err)
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        ApiError::Pool(err)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Storage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::Coordinator(err) => {
                let status = match &err {
                    CoordinatorError::NotFound(_) => StatusCode::NOT_FOUND,
                    CoordinatorError::InvalidTransition(_)
                    | CoordinatorError::OutOfOrderStep { .. } => StatusCode::CONFLICT,
                    CoordinatorError::BudgetExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                    CoordinatorError::ActionBlocked(_) => StatusCode::FORBIDDEN,
                    CoordinatorError::Timeout { .. }
                    | CoordinatorError::TransientProvider(_)
                    | CoordinatorError::Sandbox(_) => StatusCode::BAD_GATEWAY,
                    CoordinatorError::Persistence(_) | CoordinatorError::RecoveryAmbiguity(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string())
            }
            ApiError::Pool(err) => (StatusCode::BAD_GATEWAY, err.to_string()),
            ApiError::Storage(err) => match &err {
                StorageError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string()),
            },
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };

        (status, ResponseJson(ApiResponse::<()>::error(message))).into_response()
    }
}
