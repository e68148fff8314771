// ABOUTME: Agent execution and step type definitions
// ABOUTME: Structures for the execution state machine and its append-only step log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    WaitingConfirmation,
    Succeeded,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, WaitingConfirmation)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
                | (WaitingConfirmation, Running)
                | (WaitingConfirmation, Cancelled)
                | (WaitingConfirmation, Failed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    ToolCall,
    ModelResponse,
    SafetyCheck,
    Error,
}

/// One entry in an execution's durable step log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStep {
    pub seq: i64,
    pub kind: StepKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub id: String,
    pub project_id: String,
    pub agent_type: String,
    pub status: ExecutionStatus,
    pub failure_reason: Option<String>,
    pub context: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCreateInput {
    pub project_id: String,
    pub agent_type: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

/// Caller-supplied step; the coordinator validates seq ordering
#[derive(Debug, Clone, Deserialize)]
pub struct NewStep {
    pub seq: i64,
    pub kind: StepKind,
    pub payload: serde_json::Value,
}
