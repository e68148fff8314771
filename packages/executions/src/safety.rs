// ABOUTME: Safety classification interface for risk-bearing agent actions
// ABOUTME: An external classifier decides whether an action proceeds or needs confirmation

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Action about to be taken on behalf of an agent
#[derive(Debug, Clone, Serialize)]
pub struct AgentAction {
    pub kind: String,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskClassification {
    pub allowed: bool,
    pub requires_confirmation: bool,
    pub risk_level: RiskLevel,
    pub reason: Option<String>,
}

#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    async fn classify(
        &self,
        action: &AgentAction,
        context: Option<&serde_json::Value>,
    ) -> Result<RiskClassification, ClassifierError>;
}
