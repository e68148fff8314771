// ABOUTME: Admission control guard for metered calls
// ABOUTME: Checks estimated cost against the remaining budget before the call is issued

use crate::storage::UsageStorage;
use crate::types::{current_period, BudgetDecision, BudgetLedger, UsageRecord};
use corral_storage::Result;
use sqlx::SqlitePool;
use tracing::{debug, warn};

pub struct BudgetGuard {
    storage: UsageStorage,
    default_limit: f64,
}

impl BudgetGuard {
    pub fn new(pool: SqlitePool, default_limit: f64) -> Self {
        Self {
            storage: UsageStorage::new(pool),
            default_limit,
        }
    }

    /// Decide whether a call with the given estimated cost may proceed.
    /// The check uses recorded spend only; in-flight calls are not counted.
    pub async fn pre_validate(&self, project_id: &str, estimated_cost: f64) -> Result<BudgetDecision> {
        let period = current_period();
        let limit = self
            .storage
            .limit_for(project_id, &period)
            .await?
            .unwrap_or(self.default_limit);
        let spent = self.storage.spent(project_id, &period).await?;
        let remaining = (limit - spent).max(0.0);
        let allowed = spent + estimated_cost <= limit;

        if allowed {
            debug!(
                "Budget check for {}: spent {:.4} + est {:.4} within limit {:.4}",
                project_id, spent, estimated_cost, limit
            );
        } else {
            warn!(
                "Budget exceeded for {}: spent {:.4} + est {:.4} over limit {:.4}",
                project_id, spent, estimated_cost, limit
            );
        }

        Ok(BudgetDecision { allowed, remaining })
    }

    /// Record the actual cost after a metered call completed
    pub async fn record_actual_usage(&self, record: &UsageRecord) -> Result<()> {
        self.storage.upsert_record(record).await
    }

    pub async fn set_limit(&self, project_id: &str, cost_limit: f64) -> Result<()> {
        self.storage
            .set_limit(project_id, &current_period(), cost_limit)
            .await
    }

    pub async fn ledger(&self, project_id: &str) -> Result<BudgetLedger> {
        let period = current_period();
        let cost_limit = self
            .storage
            .limit_for(project_id, &period)
            .await?
            .unwrap_or(self.default_limit);
        let spent_cost = self.storage.spent(project_id, &period).await?;
        Ok(BudgetLedger {
            project_id: project_id.to_string(),
            period,
            spent_cost,
            cost_limit,
        })
    }
}
