// ABOUTME: Error taxonomy for the execution coordinator
// ABOUTME: Distinguishes timeouts, budget rejections, persistence failures, and recovery ambiguity

use corral_storage::StorageError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Budget exceeded for project {project_id} (remaining {remaining:.4})")]
    BudgetExceeded { project_id: String, remaining: f64 },

    #[error("Persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("Recovery ambiguity: {0}")]
    RecoveryAmbiguity(String),

    #[error("Execution not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Out-of-order step: expected seq greater than {last}, got {got}")]
    OutOfOrderStep { last: i64, got: i64 },

    #[error("Action blocked by safety policy: {0}")]
    ActionBlocked(String),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] corral_sandbox::PoolError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
