use crate::registry::HandlerRegistry;
use crate::transition::select_transition;
use async_trait::async_trait;
use orchcore::{
    Activity, ActivityContext, ActivityError, ActivityId, ActivityType, ConditionEvaluator,
    Context, EngineError, EventBus, OrchestrationEngine, Workflow, WorkflowExecution,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Registry-backed [`OrchestrationEngine`]
pub struct DefaultEngine {
    registry: Arc<HandlerRegistry>,
    evaluator: Arc<dyn ConditionEvaluator>,
    events: EventBus,
    default_timeout: Option<Duration>,
    cancellation: CancellationToken,
}

impl DefaultEngine {
    pub fn new(
        registry: Arc<HandlerRegistry>,
        evaluator: Arc<dyn ConditionEvaluator>,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            evaluator,
            events,
            default_timeout: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Handlers get child tokens of `token`; cancelling it asks every
    /// in-flight handler to stop.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    fn context_for(
        &self,
        execution: &WorkflowExecution,
        activity: &Activity,
        parameters: &std::collections::HashMap<String, serde_json::Value>,
    ) -> ActivityContext {
        ActivityContext {
            execution_id: execution.id,
            activity_id: activity.id.clone(),
            input: activity.map_input(&execution.context),
            parameters: parameters.clone(),
            events: self.events.create_emitter(execution.id, activity.id.clone()),
            cancellation: self.cancellation.child_token(),
        }
    }
}

#[async_trait]
impl OrchestrationEngine for DefaultEngine {
    async fn execute_activity(
        &self,
        execution: &WorkflowExecution,
        activity: &Activity,
    ) -> Result<Context, ActivityError> {
        // Routing-only activities (decisions, joins) have nothing to run.
        if activity.config.handler.is_empty() {
            return Ok(Context::new());
        }
        let handler = self
            .registry
            .get(&activity.config.handler)
            .ok_or_else(|| ActivityError::HandlerNotFound(activity.config.handler.clone()))?;
        let ctx = self.context_for(execution, activity, &activity.config.parameters);

        let start = Instant::now();
        let limit = activity
            .timeout_ms
            .map(Duration::from_millis)
            .or(self.default_timeout);
        let result = match limit {
            Some(limit) => timeout(limit, handler.execute(ctx))
                .await
                .map_err(|_| ActivityError::Timeout {
                    millis: limit.as_millis() as u64,
                })?,
            None => handler.execute(ctx).await,
        };

        tracing::debug!(
            execution_id = %execution.id,
            activity_id = %activity.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Activity handler returned"
        );
        result
    }

    async fn rollback_activity(
        &self,
        execution: &WorkflowExecution,
        activity: &Activity,
    ) -> Result<(), ActivityError> {
        let Some(rollback) = &activity.rollback else {
            return Ok(());
        };
        let ctx = self.context_for(execution, activity, &rollback.parameters);

        // An empty handler name means the activity's own handler compensates.
        if rollback.handler.is_empty() {
            let handler = self
                .registry
                .get(&activity.config.handler)
                .ok_or_else(|| ActivityError::HandlerNotFound(activity.config.handler.clone()))?;
            handler.rollback(ctx).await
        } else {
            let handler = self
                .registry
                .get(&rollback.handler)
                .ok_or_else(|| ActivityError::HandlerNotFound(rollback.handler.clone()))?;
            handler.execute(ctx).await.map(|_| ())
        }
    }

    fn evaluate_condition(
        &self,
        execution: &WorkflowExecution,
        expression: &str,
    ) -> Result<bool, EngineError> {
        Ok(self.evaluator.evaluate(expression, &execution.context)?)
    }

    fn process_transition(
        &self,
        execution: &WorkflowExecution,
        workflow: &Workflow,
    ) -> Result<ActivityId, EngineError> {
        let current = execution
            .current_activity_id
            .as_deref()
            .ok_or(EngineError::NoCurrentActivity)?;
        let activity = workflow
            .get_activity(current)
            .map_err(|_| EngineError::ActivityNotFound(current.to_string()))?;

        if activity.activity_type == ActivityType::Decision {
            for condition in &activity.config.conditions {
                if self.evaluate_condition(execution, &condition.expression)? {
                    return Ok(condition.next_activity_id.clone());
                }
            }
        }

        select_transition(workflow, current, &execution.context, self.evaluator.as_ref())?
            .map(|t| t.to_activity_id.clone())
            .ok_or_else(|| EngineError::NoValidTransition(current.to_string()))
    }
}
