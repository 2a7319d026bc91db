//! Core abstractions for the orchestration engine
//!
//! Workflow definitions, the execution state machine, errors, events and the
//! traits the runtime plugs into. Nothing in here spawns tasks or touches
//! storage.

pub mod definition;
mod engine;
mod error;
pub mod events;
pub mod execution;
mod handler;
mod ids;
pub mod repository;

pub use definition::{
    next_version, Activity, ActivityConfig, ActivityId, ActivityType, DecisionCondition,
    RetryPolicy, RollbackConfig, Transition, Workflow, WorkflowId, WorkflowSpec, WorkflowType,
};
pub use engine::{ConditionEvaluator, OrchestrationEngine};
pub use error::{
    ActivityError, ConditionError, DefinitionError, EngineError, ExecutionError, FlowError,
    RepositoryError,
};
pub use events::{EventBus, EventEmitter, WorkflowEvent};
pub use execution::{
    lookup_path, ActivityExecution, ActivityStatus, Context, ExecutionId, ExecutionStatus,
    HistoryIndex, WorkflowExecution,
};
pub use handler::{ActivityContext, ActivityHandler, HandlerMetadata};
pub use ids::{IdGenerator, UuidGenerator};
pub use repository::{ExecutionRepository, WorkflowRepository};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
