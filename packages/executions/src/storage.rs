// ABOUTME: Execution state and step storage layer using SQLite
// ABOUTME: Handles durable execution rows and the append-only step log

use crate::types::{AgentStep, ExecutionCreateInput, ExecutionState, ExecutionStatus, StepKind};
use chrono::{DateTime, Utc};
use corral_storage::{Result, StorageError};
use nanoid::nanoid;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

#[derive(Clone)]
pub struct ExecutionStorage {
    pool: SqlitePool,
}

impl ExecutionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_execution(&self, input: ExecutionCreateInput) -> Result<ExecutionState> {
        let id = format!("exec-{}", nanoid!());
        let now = Utc::now();
        let context = input
            .context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Database(format!("Failed to serialize context: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO executions (id, project_id, agent_type, status, failure_reason, context, created_at, updated_at)
            VALUES (?, ?, ?, ?, NULL, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&input.project_id)
        .bind(&input.agent_type)
        .bind(ExecutionStatus::Pending)
        .bind(&context)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Sqlx)?;

        debug!("Created execution {} for project {}", id, input.project_id);
        self.get_execution(&id).await
    }

    pub async fn get_execution(&self, id: &str) -> Result<ExecutionState> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::Sqlx)?;

        match row {
            Some(row) => row_to_execution(&row),
            None => Err(StorageError::NotFound(format!("Execution {id} not found"))),
        }
    }

    pub async fn update_status(
        &self,
        id: &str,
        status: ExecutionStatus,
        failure_reason: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?, failure_reason = COALESCE(?, failure_reason), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(failure_reason)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("Execution {id} not found")));
        }
        debug!("Execution {} status -> {:?}", id, status);
        Ok(())
    }

    pub async fn list_by_status(&self, statuses: &[ExecutionStatus]) -> Result<Vec<ExecutionState>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let query = format!(
            "SELECT * FROM executions WHERE status IN ({placeholders}) ORDER BY created_at ASC"
        );
        let mut q = sqlx::query(&query);
        for status in statuses {
            q = q.bind(*status);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(StorageError::Sqlx)?;
        rows.iter().map(row_to_execution).collect()
    }

    /// Highest persisted seq for the execution, 0 when the log is empty
    pub async fn last_seq(&self, execution_id: &str) -> Result<i64> {
        let seq: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM execution_steps WHERE execution_id = ?")
                .bind(execution_id)
                .fetch_one(&self.pool)
                .await
                .map_err(StorageError::Sqlx)?;
        Ok(seq)
    }

    pub async fn append_step(&self, execution_id: &str, step: &AgentStep) -> Result<()> {
        let payload = serde_json::to_string(&step.payload)
            .map_err(|e| StorageError::Database(format!("Failed to serialize payload: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO execution_steps (execution_id, seq, kind, payload, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution_id)
        .bind(step.seq)
        .bind(step.kind)
        .bind(&payload)
        .bind(step.created_at)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Sqlx)?;

        sqlx::query("UPDATE executions SET updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(execution_id)
            .execute(&self.pool)
            .await
            .map_err(StorageError::Sqlx)?;

        debug!("Appended step {} to execution {}", step.seq, execution_id);
        Ok(())
    }

    pub async fn list_steps(&self, execution_id: &str) -> Result<Vec<AgentStep>> {
        let rows = sqlx::query(
            "SELECT seq, kind, payload, created_at FROM execution_steps WHERE execution_id = ? ORDER BY seq ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Sqlx)?;
        rows.iter().map(row_to_step).collect()
    }
}

fn row_to_execution(row: &SqliteRow) -> Result<ExecutionState> {
    let context: Option<String> = row.try_get("context").map_err(StorageError::Sqlx)?;
    let context = context
        .map(|c| serde_json::from_str(&c))
        .transpose()
        .map_err(|e| StorageError::Database(format!("Failed to parse context: {e}")))?;

    Ok(ExecutionState {
        id: row.try_get("id").map_err(StorageError::Sqlx)?,
        project_id: row.try_get("project_id").map_err(StorageError::Sqlx)?,
        agent_type: row.try_get("agent_type").map_err(StorageError::Sqlx)?,
        status: row.try_get("status").map_err(StorageError::Sqlx)?,
        failure_reason: row.try_get("failure_reason").map_err(StorageError::Sqlx)?,
        context,
        created_at: row.try_get("created_at").map_err(StorageError::Sqlx)?,
        updated_at: row.try_get("updated_at").map_err(StorageError::Sqlx)?,
    })
}

fn row_to_step(row: &SqliteRow) -> Result<AgentStep> {
    let payload: String = row.try_get("payload").map_err(StorageError::Sqlx)?;
    let payload = serde_json::from_str(&payload)
        .map_err(|e| StorageError::Database(format!("Failed to parse payload: {e}")))?;
    let kind: StepKind = row.try_get("kind").map_err(StorageError::Sqlx)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(StorageError::Sqlx)?;

    Ok(AgentStep {
        seq: row.try_get("seq").map_err(StorageError::Sqlx)?,
        kind,
        payload,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> ExecutionStorage {
        let pool = corral_storage::init_memory_pool().await.unwrap();
        ExecutionStorage::new(pool)
    }

    fn input(project: &str) -> ExecutionCreateInput {
        ExecutionCreateInput {
            project_id: project.to_string(),
            agent_type: "coder".to_string(),
            context: Some(serde_json::json!({"branch": "main"})),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_execution() {
        let storage = storage().await;
        let created = storage.create_execution(input("proj-a")).await.unwrap();

        assert!(created.id.starts_with("exec-"));
        assert_eq!(created.status, ExecutionStatus::Pending);
        assert_eq!(created.context, Some(serde_json::json!({"branch": "main"})));

        let fetched = storage.get_execution(&created.id).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.project_id, "proj-a");
    }

    #[tokio::test]
    async fn test_get_missing_execution_is_not_found() {
        let storage = storage().await;
        let result = storage.get_execution("exec-missing").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_status_preserves_failure_reason() {
        let storage = storage().await;
        let created = storage.create_execution(input("proj-a")).await.unwrap();

        storage
            .update_status(&created.id, ExecutionStatus::Running, None)
            .await
            .unwrap();
        storage
            .update_status(&created.id, ExecutionStatus::Failed, Some("provider error"))
            .await
            .unwrap();

        let fetched = storage.get_execution(&created.id).await.unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Failed);
        assert_eq!(fetched.failure_reason.as_deref(), Some("provider error"));
    }

    #[tokio::test]
    async fn test_step_log_round_trip_in_order() {
        let storage = storage().await;
        let created = storage.create_execution(input("proj-a")).await.unwrap();

        assert_eq!(storage.last_seq(&created.id).await.unwrap(), 0);

        for seq in 1..=3 {
            let step = AgentStep {
                seq,
                kind: StepKind::ToolCall,
                payload: serde_json::json!({"n": seq}),
                created_at: Utc::now(),
            };
            storage.append_step(&created.id, &step).await.unwrap();
        }

        assert_eq!(storage.last_seq(&created.id).await.unwrap(), 3);
        let steps = storage.list_steps(&created.id).await.unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].seq, 1);
        assert_eq!(steps[2].payload, serde_json::json!({"n": 3}));
    }

    #[tokio::test]
    async fn test_list_by_status_filters() {
        let storage = storage().await;
        let a = storage.create_execution(input("proj-a")).await.unwrap();
        let b = storage.create_execution(input("proj-b")).await.unwrap();
        storage
            .update_status(&a.id, ExecutionStatus::Running, None)
            .await
            .unwrap();

        let running = storage
            .list_by_status(&[ExecutionStatus::Running, ExecutionStatus::WaitingConfirmation])
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, a.id);

        let pending = storage.list_by_status(&[ExecutionStatus::Pending]).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);
    }
}
