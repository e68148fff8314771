// ABOUTME: Development collaborators wired into the server binary
// ABOUTME: Local-process sandbox provider plus permissive model and safety defaults

use async_trait::async_trait;
use corral_executions::{
    AgentAction, ClassifierError, ModelClient, ModelError, ModelResponse, RiskClassification,
    RiskLevel, SafetyClassifier,
};
use corral_sandbox::{ExecResult, ProviderError, SandboxHandle, SandboxProvider};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::debug;

/// Runs sandbox commands as local processes under a throwaway workdir.
/// Intended for development; production deployments wire a remote provider.
pub struct ProcessSandboxProvider;

struct ProcessHandle {
    id: String,
    workdir: TempDir,
}

#[async_trait]
impl SandboxProvider for ProcessSandboxProvider {
    async fn create(
        &self,
        owner_id: &str,
    ) -> corral_sandbox::provider::Result<Arc<dyn SandboxHandle>> {
        let workdir = TempDir::new()
            .map_err(|e| ProviderError::CreationFailed(format!("workdir: {e}")))?;
        let id = format!("proc-{owner_id}");
        debug!("Created local sandbox {} at {}", id, workdir.path().display());
        Ok(Arc::new(ProcessHandle { id, workdir }))
    }
}

#[async_trait]
impl SandboxHandle for ProcessHandle {
    fn remote_id(&self) -> &str {
        &self.id
    }

    async fn run_command(&self, command: &[String]) -> corral_sandbox::provider::Result<ExecResult> {
        let Some((program, args)) = command.split_first() else {
            return Err(ProviderError::CommandFailed("empty command".to_string()));
        };
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(self.workdir.path())
            .output()
            .await
            .map_err(|e| ProviderError::CommandFailed(e.to_string()))?;
        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1) as i64,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn read_file(&self, path: &str) -> corral_sandbox::provider::Result<Vec<u8>> {
        tokio::fs::read(self.workdir.path().join(path))
            .await
            .map_err(|e| ProviderError::FileTransfer(e.to_string()))
    }

    async fn write_file(&self, path: &str, contents: &[u8]) -> corral_sandbox::provider::Result<()> {
        let target = self.workdir.path().join(path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ProviderError::FileTransfer(e.to_string()))?;
        }
        tokio::fs::write(target, contents)
            .await
            .map_err(|e| ProviderError::FileTransfer(e.to_string()))
    }

    async fn kill(&self) -> corral_sandbox::provider::Result<()> {
        // The workdir is removed when the handle drops
        Ok(())
    }
}

/// Echoes prompts back at zero cost until a real provider is configured
pub struct DevModelClient;

#[async_trait]
impl ModelClient for DevModelClient {
    async fn invoke(
        &self,
        prompt: &str,
        _context: Option<&serde_json::Value>,
    ) -> Result<ModelResponse, ModelError> {
        Ok(ModelResponse {
            text: format!("dev model echo: {prompt}"),
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
        })
    }
}

/// Allows every action without confirmation
pub struct PermissiveClassifier;

#[async_trait]
impl SafetyClassifier for PermissiveClassifier {
    async fn classify(
        &self,
        _action: &AgentAction,
        _context: Option<&serde_json::Value>,
    ) -> Result<RiskClassification, ClassifierError> {
        Ok(RiskClassification {
            allowed: true,
            requires_confirmation: false,
            risk_level: RiskLevel::Low,
            reason: None,
        })
    }
}
