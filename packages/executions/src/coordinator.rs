// ABOUTME: Execution coordinator driving the agent state machine
// ABOUTME: Per-execution locking, budget interlock, safety gating, persist-then-publish appends, recovery

use crate::error::{CoordinatorError, Result};
use crate::events::EventBus;
use crate::model::{ModelClient, ModelRequest, ModelResponse};
use crate::safety::{AgentAction, SafetyClassifier};
use crate::storage::ExecutionStorage;
use crate::types::{
    AgentStep, ExecutionCreateInput, ExecutionState, ExecutionStatus, NewStep, StepKind,
};
use chrono::Utc;
use corral_budget::{BudgetGuard, UsageRecord};
use corral_sandbox::{ExecResult, SandboxPool};
use corral_storage::StorageError;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

enum GateOutcome {
    Proceed,
    Parked,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub model_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            model_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(120),
        }
    }
}

pub struct ExecutionCoordinator {
    storage: ExecutionStorage,
    events: Arc<EventBus>,
    budget: Arc<BudgetGuard>,
    sandboxes: Arc<SandboxPool>,
    model: Arc<dyn ModelClient>,
    safety: Arc<dyn SafetyClassifier>,
    config: CoordinatorConfig,
    write_locks: LockMap,
}

impl ExecutionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: ExecutionStorage,
        events: Arc<EventBus>,
        budget: Arc<BudgetGuard>,
        sandboxes: Arc<SandboxPool>,
        model: Arc<dyn ModelClient>,
        safety: Arc<dyn SafetyClassifier>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            storage,
            events,
            budget,
            sandboxes,
            model,
            safety,
            config,
            write_locks: LockMap::new(),
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Create an execution and move it to Running
    pub async fn start(&self, input: ExecutionCreateInput) -> Result<ExecutionState> {
        let state = self.storage.create_execution(input).await?;
        self.storage
            .update_status(&state.id, ExecutionStatus::Running, None)
            .await?;
        let state = self.fetch(&state.id).await?;
        info!("Started execution {} for project {}", state.id, state.project_id);
        Ok(state)
    }

    pub async fn get(&self, execution_id: &str) -> Result<ExecutionState> {
        self.fetch(execution_id).await
    }

    pub async fn steps(&self, execution_id: &str) -> Result<Vec<AgentStep>> {
        self.fetch(execution_id).await?;
        Ok(self.storage.list_steps(execution_id).await?)
    }

    /// Append a caller-supplied step. Seq must be strictly greater than the
    /// last persisted seq; subscribers only ever see persisted steps.
    pub async fn append_step(&self, execution_id: &str, new_step: NewStep) -> Result<AgentStep> {
        let lock = self.write_locks.acquire(execution_id);
        let _guard = lock.lock().await;
        let state = self.fetch(execution_id).await?;
        if state.status.is_terminal() {
            return Err(CoordinatorError::InvalidTransition(format!(
                "Execution {execution_id} is {:?}, step log is closed",
                state.status
            )));
        }

        let last = self.storage.last_seq(execution_id).await?;
        if new_step.seq <= last {
            return Err(CoordinatorError::OutOfOrderStep {
                last,
                got: new_step.seq,
            });
        }

        let step = AgentStep {
            seq: new_step.seq,
            kind: new_step.kind,
            payload: new_step.payload,
            created_at: Utc::now(),
        };
        self.storage.append_step(execution_id, &step).await?;
        self.events.emit(execution_id, &step);
        Ok(step)
    }

    /// Run one model call within a Running execution. Returns `None` when
    /// the call was parked behind an operator confirmation instead.
    pub async fn run_model_call(
        &self,
        execution_id: &str,
        request: ModelRequest,
    ) -> Result<Option<ModelResponse>> {
        let lock = self.write_locks.acquire(execution_id);
        let _guard = lock.lock().await;
        let state = self.require_running(execution_id).await?;

        // Admission control happens before the provider is ever contacted
        let decision = self
            .budget
            .pre_validate(&state.project_id, request.estimated_cost)
            .await?;
        if !decision.allowed {
            self.record_failure_locked(
                execution_id,
                "budget exceeded",
                json!({
                    "error": "budget exceeded",
                    "estimated_cost": request.estimated_cost,
                    "remaining": decision.remaining,
                }),
            )
            .await?;
            return Err(CoordinatorError::BudgetExceeded {
                project_id: state.project_id,
                remaining: decision.remaining,
            });
        }

        if !request.bypass_confirmation {
            let action = AgentAction {
                kind: "model_call".to_string(),
                detail: json!({"prompt": request.prompt}),
            };
            if let GateOutcome::Parked = self
                .apply_safety_gate(execution_id, &action, request.context.as_ref())
                .await?
            {
                return Ok(None);
            }
        }

        let invoked = tokio::time::timeout(
            self.config.model_timeout,
            self.model.invoke(&request.prompt, request.context.as_ref()),
        )
        .await;

        let response = match invoked {
            Err(_) => {
                let error = CoordinatorError::Timeout {
                    operation: "Model call",
                    timeout: self.config.model_timeout,
                };
                self.record_failure_locked(
                    execution_id,
                    &error.to_string(),
                    json!({"error": error.to_string()}),
                )
                .await?;
                return Err(error);
            }
            Ok(Err(e)) => {
                self.record_failure_locked(
                    execution_id,
                    &e.to_string(),
                    json!({"error": e.to_string()}),
                )
                .await?;
                return Err(CoordinatorError::TransientProvider(e.to_string()));
            }
            Ok(Ok(response)) => response,
        };

        let seq = self.storage.last_seq(execution_id).await? + 1;
        let step = AgentStep {
            seq,
            kind: StepKind::ModelResponse,
            payload: json!({
                "text": response.text,
                "input_tokens": response.input_tokens,
                "output_tokens": response.output_tokens,
                "cost": response.cost,
            }),
            created_at: Utc::now(),
        };
        self.storage.append_step(execution_id, &step).await?;
        self.events.emit(execution_id, &step);

        let usage = UsageRecord::new(
            &state.project_id,
            response.cost,
            Some(format!("model call for {execution_id}")),
        );
        self.budget.record_actual_usage(&usage).await?;

        Ok(Some(response))
    }

    /// Run one sandbox command within a Running execution. Returns `None`
    /// when the command was parked behind an operator confirmation.
    pub async fn run_command(
        &self,
        execution_id: &str,
        command: Vec<String>,
        bypass_confirmation: bool,
    ) -> Result<Option<ExecResult>> {
        let lock = self.write_locks.acquire(execution_id);
        let _guard = lock.lock().await;
        let state = self.require_running(execution_id).await?;

        if !bypass_confirmation {
            let action = AgentAction {
                kind: "tool_call".to_string(),
                detail: json!({"command": command}),
            };
            if let GateOutcome::Parked = self
                .apply_safety_gate(execution_id, &action, state.context.as_ref())
                .await?
            {
                return Ok(None);
            }
        }

        let lease = match self.sandboxes.get_or_start(&state.project_id).await {
            Ok(lease) => lease,
            Err(e) => {
                self.record_failure_locked(
                    execution_id,
                    &e.to_string(),
                    json!({"error": e.to_string()}),
                )
                .await?;
                return Err(CoordinatorError::Sandbox(e));
            }
        };

        let run = tokio::time::timeout(
            self.config.command_timeout,
            lease.handle.run_command(&command),
        )
        .await;

        let result = match run {
            Err(_) => {
                let error = CoordinatorError::Timeout {
                    operation: "Sandbox command",
                    timeout: self.config.command_timeout,
                };
                self.record_failure_locked(
                    execution_id,
                    &error.to_string(),
                    json!({"error": error.to_string(), "command": command}),
                )
                .await?;
                return Err(error);
            }
            Ok(Err(e)) => {
                self.record_failure_locked(
                    execution_id,
                    &e.to_string(),
                    json!({"error": e.to_string(), "command": command}),
                )
                .await?;
                return Err(CoordinatorError::TransientProvider(e.to_string()));
            }
            Ok(Ok(result)) => result,
        };

        let seq = self.storage.last_seq(execution_id).await? + 1;
        let step = AgentStep {
            seq,
            kind: StepKind::ToolCall,
            payload: json!({
                "command": command,
                "sandbox_id": lease.sandbox_id,
                "exit_code": result.exit_code,
                "stdout": result.stdout,
                "stderr": result.stderr,
            }),
            created_at: Utc::now(),
        };
        self.storage.append_step(execution_id, &step).await?;
        self.events.emit(execution_id, &step);

        Ok(Some(result))
    }

    /// Operator approved the parked action; the execution resumes Running
    pub async fn confirm(&self, execution_id: &str) -> Result<ExecutionState> {
        let lock = self.write_locks.acquire(execution_id);
        let _guard = lock.lock().await;
        let state = self.fetch(execution_id).await?;
        if state.status != ExecutionStatus::WaitingConfirmation {
            return Err(CoordinatorError::InvalidTransition(format!(
                "Execution {execution_id} is {:?}, nothing to confirm",
                state.status
            )));
        }
        self.storage
            .update_status(execution_id, ExecutionStatus::Running, None)
            .await?;
        info!("Execution {} confirmed, resuming", execution_id);
        self.fetch(execution_id).await
    }

    /// Operator rejected the parked action; the execution is cancelled
    pub async fn reject(&self, execution_id: &str) -> Result<ExecutionState> {
        let lock = self.write_locks.acquire(execution_id);
        let _guard = lock.lock().await;
        let state = self.fetch(execution_id).await?;
        if state.status != ExecutionStatus::WaitingConfirmation {
            return Err(CoordinatorError::InvalidTransition(format!(
                "Execution {execution_id} is {:?}, nothing to reject",
                state.status
            )));
        }

        let seq = self.storage.last_seq(execution_id).await? + 1;
        let step = AgentStep {
            seq,
            kind: StepKind::SafetyCheck,
            payload: json!({"confirmation": "rejected"}),
            created_at: Utc::now(),
        };
        self.storage.append_step(execution_id, &step).await?;
        self.storage
            .update_status(
                execution_id,
                ExecutionStatus::Cancelled,
                Some("confirmation rejected"),
            )
            .await?;
        self.events.emit(execution_id, &step);
        info!("Execution {} cancelled by rejection", execution_id);
        self.fetch(execution_id).await
    }

    pub async fn cancel(&self, execution_id: &str) -> Result<ExecutionState> {
        self.transition(execution_id, ExecutionStatus::Cancelled, Some("cancelled"))
            .await
    }

    pub async fn complete(&self, execution_id: &str) -> Result<ExecutionState> {
        self.transition(execution_id, ExecutionStatus::Succeeded, None)
            .await
    }

    pub async fn fail(&self, execution_id: &str, reason: &str) -> Result<ExecutionState> {
        let lock = self.write_locks.acquire(execution_id);
        let _guard = lock.lock().await;
        let state = self.fetch(execution_id).await?;
        if state.status.is_terminal() {
            return Err(CoordinatorError::InvalidTransition(format!(
                "Execution {execution_id} is already {:?}",
                state.status
            )));
        }
        self.record_failure_locked(execution_id, reason, json!({"error": reason}))
            .await?;
        self.fetch(execution_id).await
    }

    /// Startup sweep: every execution left non-terminal by a previous process
    /// is marked Failed with a terminal error step. Idempotent; a second
    /// sweep finds nothing to do.
    pub async fn recover(&self) -> Result<usize> {
        let in_flight = self
            .storage
            .list_by_status(&[ExecutionStatus::Pending, ExecutionStatus::Running, ExecutionStatus::WaitingConfirmation])
            .await?;

        let mut recovered = 0;
        for execution in in_flight {
            let lock = self.write_locks.acquire(&execution.id);
            let _guard = lock.lock().await;
            // Re-check under the lock; a concurrent caller may have finished it
            let current = self.fetch(&execution.id).await?;
            if current.status.is_terminal() {
                continue;
            }
            let ambiguity = CoordinatorError::RecoveryAmbiguity(format!(
                "execution {} was {:?} when the process restarted; remote state unknown",
                execution.id, current.status
            ));
            self.record_failure_locked(
                &execution.id,
                &ambiguity.to_string(),
                json!({"error": ambiguity.to_string(), "recovered": true}),
            )
            .await?;
            recovered += 1;
        }

        if recovered > 0 {
            info!("Recovery marked {} execution(s) failed", recovered);
        }
        Ok(recovered)
    }

    async fn transition(
        &self,
        execution_id: &str,
        next: ExecutionStatus,
        failure_reason: Option<&str>,
    ) -> Result<ExecutionState> {
        let lock = self.write_locks.acquire(execution_id);
        let _guard = lock.lock().await;
        let current = self.fetch(execution_id).await?;
        if !current.status.can_transition_to(next) {
            return Err(CoordinatorError::InvalidTransition(format!(
                "{:?} -> {:?} for {execution_id}",
                current.status, next
            )));
        }
        self.storage
            .update_status(execution_id, next, failure_reason)
            .await?;
        info!("Execution {} -> {:?}", execution_id, next);
        self.fetch(execution_id).await
    }

    /// Classify an action, parking the execution in WaitingConfirmation or
    /// failing it when the classifier blocks the action outright
    async fn apply_safety_gate(
        &self,
        execution_id: &str,
        action: &AgentAction,
        context: Option<&serde_json::Value>,
    ) -> Result<GateOutcome> {
        let classification = self
            .safety
            .classify(action, context)
            .await
            .map_err(|e| CoordinatorError::TransientProvider(e.to_string()))?;

        if !classification.allowed {
            let reason = classification
                .reason
                .unwrap_or_else(|| "action not allowed".to_string());
            self.record_failure_locked(
                execution_id,
                "blocked by safety policy",
                json!({"error": reason, "action": action.kind}),
            )
            .await?;
            return Err(CoordinatorError::ActionBlocked(reason));
        }

        if classification.requires_confirmation {
            self.storage
                .update_status(execution_id, ExecutionStatus::WaitingConfirmation, None)
                .await?;
            let seq = self.storage.last_seq(execution_id).await? + 1;
            let step = AgentStep {
                seq,
                kind: StepKind::SafetyCheck,
                payload: json!({
                    "confirmation": "pending",
                    "action": action.kind,
                    "risk_level": classification.risk_level,
                    "reason": classification.reason,
                }),
                created_at: Utc::now(),
            };
            self.storage.append_step(execution_id, &step).await?;
            self.events.emit(execution_id, &step);
            info!("Execution {} waiting for confirmation", execution_id);
            return Ok(GateOutcome::Parked);
        }

        Ok(GateOutcome::Proceed)
    }

    /// Persist an error step and mark the execution Failed, then publish.
    /// Callers must hold the execution's write lock.
    async fn record_failure_locked(
        &self,
        execution_id: &str,
        reason: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let seq = self.storage.last_seq(execution_id).await? + 1;
        let step = AgentStep {
            seq,
            kind: StepKind::Error,
            payload,
            created_at: Utc::now(),
        };
        self.storage.append_step(execution_id, &step).await?;
        self.storage
            .update_status(execution_id, ExecutionStatus::Failed, Some(reason))
            .await?;
        self.events.emit(execution_id, &step);
        warn!("Execution {} failed: {}", execution_id, reason);
        Ok(())
    }

    async fn require_running(&self, execution_id: &str) -> Result<ExecutionState> {
        let state = self.fetch(execution_id).await?;
        if state.status != ExecutionStatus::Running {
            return Err(CoordinatorError::InvalidTransition(format!(
                "Execution {execution_id} is {:?}, not running",
                state.status
            )));
        }
        Ok(state)
    }

    async fn fetch(&self, execution_id: &str) -> Result<ExecutionState> {
        self.storage
            .get_execution(execution_id)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(_) => {
                    CoordinatorError::NotFound(execution_id.to_string())
                }
                other => CoordinatorError::Persistence(other),
            })
    }

}

/// Per-execution write locks. Entries are removed as soon as the last
/// holder releases, so the map does not grow with finished executions.
struct LockMap {
    inner: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockMap {
    fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn acquire(&self, execution_id: &str) -> ExecutionLock<'_> {
        let lock = self
            .lock_inner()
            .entry(execution_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        ExecutionLock {
            map: self,
            execution_id: execution_id.to_string(),
            lock,
        }
    }

    fn release(&self, execution_id: &str, lock: &Arc<Mutex<()>>) {
        let mut inner = self.lock_inner();
        // the map's clone plus the departing holder's
        if Arc::strong_count(lock) == 2 {
            inner.remove(execution_id);
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock_inner().len()
    }
}

struct ExecutionLock<'a> {
    map: &'a LockMap,
    execution_id: String,
    lock: Arc<Mutex<()>>,
}

impl ExecutionLock<'_> {
    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for ExecutionLock<'_> {
    fn drop(&mut self) {
        self.map.release(&self.execution_id, &self.lock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_map_drops_entry_after_release() {
        let map = LockMap::new();
        {
            let lock = map.acquire("exec-1");
            let _guard = lock.lock().await;
            assert_eq!(map.len(), 1);
        }
        assert_eq!(map.len(), 0);
    }

    #[tokio::test]
    async fn test_lock_map_keeps_entry_while_contended() {
        let map = LockMap::new();
        let first = map.acquire("exec-1");
        let second = map.acquire("exec-1");

        drop(first);
        assert_eq!(map.len(), 1);

        drop(second);
        assert_eq!(map.len(), 0);
    }

    #[tokio::test]
    async fn test_lock_map_serializes_same_key() {
        let map = LockMap::new();
        let first = map.acquire("exec-1");
        let guard = first.lock().await;

        let second = map.acquire("exec-1");
        assert!(second.lock.try_lock().is_err());

        drop(guard);
        assert!(second.lock.try_lock().is_ok());
    }
}
