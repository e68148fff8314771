// ABOUTME: Agent execution coordination package for Corral
// ABOUTME: State machine, durable step log, event fan-out, and crash recovery

pub mod coordinator;
pub mod error;
pub mod events;
pub mod model;
pub mod safety;
pub mod storage;
pub mod types;

pub use coordinator::{CoordinatorConfig, ExecutionCoordinator};
pub use error::{CoordinatorError, Result};
pub use events::{EventBus, StepCallback, SubscriptionToken};
pub use model::{ModelClient, ModelError, ModelRequest, ModelResponse};
pub use safety::{
    AgentAction, ClassifierError, RiskClassification, RiskLevel, SafetyClassifier,
};
pub use storage::ExecutionStorage;
pub use types::{
    AgentStep, ExecutionCreateInput, ExecutionState, ExecutionStatus, NewStep, StepKind,
};
