// ABOUTME: Sandbox provider abstraction and pooled lifecycle management
// ABOUTME: Owns the project-to-sandbox mapping with single-flight creation and LRU eviction

pub mod pool;
pub mod provider;

pub use pool::{PoolError, SandboxInfo, SandboxLease, SandboxPool, SandboxState};
pub use provider::{ExecResult, ProviderError, SandboxHandle, SandboxProvider};
