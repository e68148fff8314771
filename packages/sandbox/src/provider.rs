// ABOUTME: Provider traits for remote sandbox backends
// ABOUTME: Defines the opaque create/run/read/write/kill interface the pool consumes

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Sandbox creation failed: {0}")]
    CreationFailed(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("File transfer failed: {0}")]
    FileTransfer(String),

    #[error("Provider not available: {0}")]
    NotAvailable(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Output of one command run inside a sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Live connection to one remote sandbox
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    /// Provider-side identifier for the remote resource
    fn remote_id(&self) -> &str;

    async fn run_command(&self, command: &[String]) -> Result<ExecResult>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    async fn write_file(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Tear down the remote resource. Idempotent on the provider side.
    async fn kill(&self) -> Result<()>;
}

/// Remote compute backend that can start sandboxes
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self, owner_id: &str) -> Result<Arc<dyn SandboxHandle>>;
}
