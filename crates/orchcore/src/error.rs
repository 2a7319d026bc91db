use crate::execution::{ActivityStatus, ExecutionStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Activity error: {0}")]
    Activity(#[from] ActivityError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Workflow already exists: {0}")]
    AlreadyExists(String),

    #[error("Workflow is not active: {0}")]
    Inactive(String),

    #[error("Runtime is shut down")]
    Shutdown,

    #[error("Background task aborted: {0}")]
    TaskAborted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// True when the error only says the execution was no longer in a state
    /// that accepts the operation.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, FlowError::Execution(e) if e.is_state_conflict())
    }
}

/// Structural problems with a workflow definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Duplicate activity id: {0}")]
    DuplicateActivityId(String),

    #[error("Activity not found: {0}")]
    ActivityNotFound(String),

    #[error("Start activity is not set")]
    MissingStartActivity,

    #[error("No end activities defined")]
    MissingEndActivities,

    #[error("No activities defined")]
    NoActivities,

    #[error("Start activity not found: {0}")]
    StartActivityNotFound(String),

    #[error("End activity not found: {0}")]
    EndActivityNotFound(String),

    #[error("Transition {from} -> {to} references an unknown activity")]
    DanglingTransition { from: String, to: String },
}

/// Operations attempted from a state that does not allow them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Execution is not pending (status: {0})")]
    NotPendingState(ExecutionStatus),

    #[error("Execution is not running (status: {0})")]
    NotRunning(ExecutionStatus),

    #[error("Execution is not suspended (status: {0})")]
    NotSuspended(ExecutionStatus),

    #[error("Execution already finished (status: {0})")]
    AlreadyFinished(ExecutionStatus),

    #[error("Execution already completed")]
    AlreadyCompleted,

    #[error("Execution already cancelled")]
    AlreadyCancelled,

    #[error("No activity execution recorded for activity: {0}")]
    ActivityExecutionNotFound(String),

    #[error("Execution has no current activity")]
    NoCurrentActivity,

    #[error("Activity {0} is not the current activity")]
    NotCurrentActivity(String),

    #[error("Activity {activity_id} is not in progress (status: {status:?})")]
    ActivityNotInFlight {
        activity_id: String,
        status: ActivityStatus,
    },
}

impl ExecutionError {
    pub fn is_state_conflict(&self) -> bool {
        matches!(
            self,
            ExecutionError::NotPendingState(_)
                | ExecutionError::NotRunning(_)
                | ExecutionError::NotSuspended(_)
                | ExecutionError::AlreadyFinished(_)
                | ExecutionError::AlreadyCompleted
                | ExecutionError::AlreadyCancelled
                | ExecutionError::NotCurrentActivity(_)
                | ExecutionError::ActivityNotInFlight { .. }
        )
    }
}

/// Failures raised while running an activity handler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActivityError {
    #[error("No handler registered for: {0}")]
    HandlerNotFound(String),

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("No valid transition from activity: {0}")]
    NoValidTransition(String),

    #[error("Condition error: {0}")]
    Condition(#[from] ConditionError),

    #[error("Activity not found in workflow: {0}")]
    ActivityNotFound(String),

    #[error("Execution has no current activity")]
    NoCurrentActivity,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConditionError {
    #[error("Invalid condition syntax: {0}")]
    Syntax(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Condition evaluation failed: {0}")]
    Evaluation(String),
}

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
