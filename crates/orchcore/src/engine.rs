use crate::{Activity, ActivityError, ActivityId, ConditionError, Context, EngineError, Workflow, WorkflowExecution};
use async_trait::async_trait;

/// Runs activity handlers and decides where an execution goes next.
/// Implementations never mutate the execution; the command handler does.
#[async_trait]
pub trait OrchestrationEngine: Send + Sync {
    /// Invoke the handler of `activity` and return the output to merge into
    /// the execution context.
    async fn execute_activity(
        &self,
        execution: &WorkflowExecution,
        activity: &Activity,
    ) -> Result<Context, ActivityError>;

    /// Invoke the rollback handler configured on `activity`, if any.
    async fn rollback_activity(
        &self,
        execution: &WorkflowExecution,
        activity: &Activity,
    ) -> Result<(), ActivityError>;

    fn evaluate_condition(
        &self,
        execution: &WorkflowExecution,
        expression: &str,
    ) -> Result<bool, EngineError>;

    /// Pick the activity that follows the execution's current activity.
    fn process_transition(
        &self,
        execution: &WorkflowExecution,
        workflow: &Workflow,
    ) -> Result<ActivityId, EngineError>;
}

/// Boolean expression language used by transition and decision conditions
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, context: &Context) -> Result<bool, ConditionError>;
}
