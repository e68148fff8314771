// ABOUTME: Model invocation interface consumed by the execution coordinator
// ABOUTME: Opaque provider client with cost-bearing responses

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Model provider error: {0}")]
    Provider(String),
}

/// Request for one model call within an execution
#[derive(Debug, Clone, Deserialize)]
pub struct ModelRequest {
    pub prompt: String,
    #[serde(default)]
    pub estimated_cost: f64,
    /// One-shot bypass set after an operator confirmed this action
    #[serde(default)]
    pub bypass_confirmation: bool,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
}

#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn invoke(
        &self,
        prompt: &str,
        context: Option<&serde_json::Value>,
    ) -> Result<ModelResponse, ModelError>;
}
