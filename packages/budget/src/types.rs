// ABOUTME: Budget and usage record type definitions
// ABOUTME: Structures for the per-project spending ledger and admission decisions

use chrono::{DateTime, Utc};
use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Calendar-month accounting period, UTC
pub fn current_period() -> String {
    Utc::now().format("%Y-%m").to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub project_id: String,
    pub period: String,
    pub cost: f64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(project_id: &str, cost: f64, description: Option<String>) -> Self {
        Self {
            id: format!("usage-{}", nanoid!()),
            project_id: project_id.to_string(),
            period: current_period(),
            cost,
            description,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of an admission check, taken before the metered call is issued
#[derive(Debug, Clone, Serialize)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub remaining: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetLedger {
    pub project_id: String,
    pub period: String,
    pub spent_cost: f64,
    pub cost_limit: f64,
}
