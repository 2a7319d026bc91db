use orchcore::{Activity, WorkflowExecution};
use std::time::Duration;

/// What to do after an activity attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDecision {
    Retry { delay: Duration },
    /// Fail the execution and run compensations
    Escalate,
}

/// Consulted by the orchestrator before a failed activity fails the
/// whole execution.
pub trait FailurePolicy: Send + Sync {
    fn decide(&self, activity: &Activity, execution: &WorkflowExecution) -> FailureDecision;
}

/// Retries according to the activity's `RetryPolicy`, escalates when it has
/// none or its attempts are used up.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicyStrategy;

impl FailurePolicy for RetryPolicyStrategy {
    fn decide(&self, activity: &Activity, execution: &WorkflowExecution) -> FailureDecision {
        let Some(policy) = &activity.retry_policy else {
            return FailureDecision::Escalate;
        };
        let attempts = execution.failed_attempts(&activity.id);
        if attempts < policy.max_attempts {
            FailureDecision::Retry {
                delay: policy.delay_for(attempts),
            }
        } else {
            FailureDecision::Escalate
        }
    }
}

/// Never retries
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFast;

impl FailurePolicy for FailFast {
    fn decide(&self, _activity: &Activity, _execution: &WorkflowExecution) -> FailureDecision {
        FailureDecision::Escalate
    }
}
