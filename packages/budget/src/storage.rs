// ABOUTME: Usage record and budget limit storage layer using SQLite
// ABOUTME: Upserts usage rows by id so a retried record never double-counts

use crate::types::UsageRecord;
use chrono::Utc;
use corral_storage::{Result, StorageError};
use sqlx::SqlitePool;
use tracing::debug;

#[derive(Clone)]
pub struct UsageStorage {
    pool: SqlitePool,
}

impl UsageStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or merge a usage record. Conflicts on id replace the stored
    /// cost rather than adding to it, so retried submissions are idempotent.
    pub async fn upsert_record(&self, record: &UsageRecord) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO usage_records (id, project_id, period, cost, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                cost = excluded.cost,
                description = excluded.description,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.project_id)
        .bind(&record.period)
        .bind(record.cost)
        .bind(&record.description)
        .bind(record.created_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Sqlx)?;

        debug!(
            "Recorded usage {} for project {} ({:.4})",
            record.id, record.project_id, record.cost
        );
        Ok(())
    }

    /// Total recorded spend for the project in the given period
    pub async fn spent(&self, project_id: &str, period: &str) -> Result<f64> {
        let total: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost), 0.0) FROM usage_records WHERE project_id = ? AND period = ?",
        )
        .bind(project_id)
        .bind(period)
        .fetch_one(&self.pool)
        .await
        .map_err(StorageError::Sqlx)?;
        Ok(total)
    }

    pub async fn limit_for(&self, project_id: &str, period: &str) -> Result<Option<f64>> {
        let limit: Option<f64> = sqlx::query_scalar(
            "SELECT cost_limit FROM budget_limits WHERE project_id = ? AND period = ?",
        )
        .bind(project_id)
        .bind(period)
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::Sqlx)?;
        Ok(limit)
    }

    pub async fn set_limit(&self, project_id: &str, period: &str, cost_limit: f64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO budget_limits (project_id, period, cost_limit, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(project_id, period) DO UPDATE SET
                cost_limit = excluded.cost_limit,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(project_id)
        .bind(period)
        .bind(cost_limit)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(StorageError::Sqlx)?;
        Ok(())
    }
}
