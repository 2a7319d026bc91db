//! Command handler: the only place executions are mutated.
//!
//! Every load-mutate-persist of an execution happens under a per-execution
//! async lock, and activity handlers always run outside of it. Commands
//! from callers hand follow-up work to the [`WorkerPool`] after the lock is
//! released; a worker carries an execution forward itself until it waits
//! on something external.

use crate::condition::ExpressionEvaluator;
use crate::config::RuntimeConfig;
use crate::engine::DefaultEngine;
use crate::policy::{FailureDecision, FailurePolicy, RetryPolicyStrategy};
use crate::pool::{Task, TaskRunner, TaskSender, WorkerPool};
use crate::registry::HandlerRegistry;
use crate::store::{InMemoryExecutionRepository, InMemoryWorkflowRepository};
use async_trait::async_trait;
use chrono::Utc;
use orchcore::{
    ActivityStatus, Context, DefinitionError, EventBus, ExecutionId, ExecutionRepository,
    ExecutionStatus, FlowError, IdGenerator, OrchestrationEngine, UuidGenerator, Workflow,
    WorkflowEvent, WorkflowExecution, WorkflowId, WorkflowRepository, WorkflowSpec, WorkflowType,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

/// Business entity an execution is started for (an order, a return, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityReference {
    pub entity_type: String,
    pub entity_id: String,
}

impl EntityReference {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

/// Arguments of [`Orchestrator::start_workflow_execution`]
#[derive(Debug, Clone)]
pub struct StartExecution {
    pub workflow_id: WorkflowId,
    pub input: Context,
    pub started_by: String,
    pub entity: Option<EntityReference>,
}

impl StartExecution {
    pub fn new(workflow_id: WorkflowId, input: Context, started_by: impl Into<String>) -> Self {
        Self {
            workflow_id,
            input,
            started_by: started_by.into(),
            entity: None,
        }
    }

    pub fn for_entity(mut self, entity: EntityReference) -> Self {
        self.entity = Some(entity);
        self
    }
}

/// Assembles an [`Orchestrator`]. Anything not supplied falls back to the
/// in-memory stores, the registry-backed engine, [`RetryPolicyStrategy`] and
/// random UUIDs.
pub struct OrchestratorBuilder {
    config: RuntimeConfig,
    registry: Arc<HandlerRegistry>,
    workflows: Option<Arc<dyn WorkflowRepository>>,
    executions: Option<Arc<dyn ExecutionRepository>>,
    engine: Option<Arc<dyn OrchestrationEngine>>,
    failure_policy: Option<Arc<dyn FailurePolicy>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl OrchestratorBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            registry: Arc::new(HandlerRegistry::new()),
            workflows: None,
            executions: None,
            engine: None,
            failure_policy: None,
            ids: None,
        }
    }

    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn workflow_repository(mut self, repository: Arc<dyn WorkflowRepository>) -> Self {
        self.workflows = Some(repository);
        self
    }

    pub fn execution_repository(mut self, repository: Arc<dyn ExecutionRepository>) -> Self {
        self.executions = Some(repository);
        self
    }

    /// Replaces the default engine. The registry is then unused.
    pub fn engine(mut self, engine: Arc<dyn OrchestrationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn failure_policy(mut self, policy: Arc<dyn FailurePolicy>) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Build and start the worker pool. Must be called from within a tokio
    /// runtime.
    pub fn build(self) -> Orchestrator {
        let shutdown = CancellationToken::new();
        let events = EventBus::new(self.config.event_buffer_size);

        let engine = self.engine.unwrap_or_else(|| {
            let engine = DefaultEngine::new(
                self.registry.clone(),
                Arc::new(ExpressionEvaluator),
                events.clone(),
            )
            .with_default_timeout(self.config.default_activity_timeout_ms.map(Duration::from_millis))
            .with_cancellation(shutdown.clone());
            Arc::new(engine)
        });

        let (tasks, receiver) = WorkerPool::channel(self.config.queue_capacity, shutdown.clone());
        let inner = Arc::new(Inner {
            workflows: self
                .workflows
                .unwrap_or_else(|| Arc::new(InMemoryWorkflowRepository::new())),
            executions: self
                .executions
                .unwrap_or_else(|| Arc::new(InMemoryExecutionRepository::new())),
            engine,
            failure_policy: self
                .failure_policy
                .unwrap_or_else(|| Arc::new(RetryPolicyStrategy)),
            ids: self.ids.unwrap_or_else(|| Arc::new(UuidGenerator)),
            events,
            locks: LockTable::default(),
            tasks,
            config: self.config,
        });

        let pool = WorkerPool::start(
            receiver,
            inner.clone(),
            inner.config.worker_count,
            shutdown,
        );
        tracing::info!(workers = inner.config.worker_count, "Orchestrator started");

        Orchestrator { inner, pool }
    }
}

/// Entry point for every workflow and execution command
pub struct Orchestrator {
    inner: Arc<Inner>,
    pool: WorkerPool,
}

impl Orchestrator {
    /// In-memory orchestrator without any handlers registered
    pub fn new(config: RuntimeConfig) -> Self {
        OrchestratorBuilder::new(config).build()
    }

    pub fn with_registry(registry: Arc<HandlerRegistry>, config: RuntimeConfig) -> Self {
        OrchestratorBuilder::new(config).registry(registry).build()
    }

    pub fn builder(config: RuntimeConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.inner.events.subscribe()
    }

    /// Stop the workers. In-flight handlers are asked to cancel; queued
    /// tasks are dropped and later commands that need the pool fail with
    /// `FlowError::Shutdown`.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
        tracing::info!("Orchestrator stopped");
    }

    // Workflow commands

    pub async fn create_workflow(&self, spec: WorkflowSpec) -> Result<Workflow, FlowError> {
        let inner = &self.inner;
        if inner.workflows.exists_by_name(&spec.name).await? {
            return Err(FlowError::AlreadyExists(spec.name));
        }
        let workflow = Workflow::from_spec(inner.ids.next_id(), spec)?;
        inner.workflows.create(&workflow).await?;
        tracing::info!(workflow_id = %workflow.id, name = %workflow.name, "Created workflow");
        Ok(workflow)
    }

    /// Replace the activity graph of a definition. Running executions keep
    /// the version they were started with.
    pub async fn update_workflow(&self, id: WorkflowId, spec: WorkflowSpec) -> Result<Workflow, FlowError> {
        let mut workflow = self.inner.load_workflow(id).await?;
        workflow.replace_from_spec(spec)?;
        workflow.updated_at = Utc::now();
        self.inner.workflows.update(&workflow).await?;
        tracing::info!(workflow_id = %id, version = %workflow.version, "Updated workflow");
        Ok(workflow)
    }

    pub async fn activate_workflow(&self, id: WorkflowId) -> Result<Workflow, FlowError> {
        let mut workflow = self.inner.load_workflow(id).await?;
        workflow.activate();
        self.inner.workflows.update(&workflow).await?;
        Ok(workflow)
    }

    pub async fn deactivate_workflow(&self, id: WorkflowId) -> Result<Workflow, FlowError> {
        let mut workflow = self.inner.load_workflow(id).await?;
        workflow.deactivate();
        self.inner.workflows.update(&workflow).await?;
        Ok(workflow)
    }

    pub async fn delete_workflow(&self, id: WorkflowId) -> Result<(), FlowError> {
        self.inner.load_workflow(id).await?;
        self.inner.workflows.delete(id).await?;
        tracing::info!(workflow_id = %id, "Deleted workflow");
        Ok(())
    }

    // Execution commands

    /// Create and start an execution. Returns once the execution is Running;
    /// the start activity runs in the background.
    pub async fn start_workflow_execution(&self, command: StartExecution) -> Result<WorkflowExecution, FlowError> {
        let inner = &self.inner;
        let workflow = inner.load_workflow(command.workflow_id).await?;
        if !workflow.is_active {
            return Err(FlowError::Inactive(workflow.name));
        }
        workflow.validate()?;
        let start_activity = workflow
            .start_activity_id
            .clone()
            .ok_or(DefinitionError::MissingStartActivity)?;

        let mut execution = WorkflowExecution::new(
            inner.ids.next_id(),
            workflow.id,
            workflow.version.clone(),
            command.input,
            command.started_by,
        );
        if let Some(entity) = command.entity {
            execution = execution.with_entity(entity.entity_type, entity.entity_id);
        }
        inner.executions.create(&execution).await?;

        {
            let _guard = inner.lock(execution.id).await;
            execution.start(&start_activity)?;
            inner.executions.update(&execution).await?;
        }

        inner.events.emit(WorkflowEvent::ExecutionStarted {
            execution_id: execution.id,
            workflow_id: workflow.id,
            workflow_version: workflow.version.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            execution_id = %execution.id,
            workflow = %workflow.name,
            version = %workflow.version,
            "Started workflow execution"
        );

        inner
            .tasks
            .submit(Task::RunActivity {
                execution_id: execution.id,
                activity_id: start_activity,
            })
            .await?;
        Ok(execution)
    }

    /// Record the result of the current activity and move the execution on.
    /// Results for any other activity, or for one already finished, are
    /// rejected.
    pub async fn complete_activity(
        &self,
        execution_id: ExecutionId,
        activity_id: &str,
        output: Context,
    ) -> Result<WorkflowExecution, FlowError> {
        let (execution, follow_up) = self.inner.complete_activity(execution_id, activity_id, output).await?;
        if let Some(task) = follow_up {
            self.inner.tasks.submit(task).await?;
        }
        Ok(execution)
    }

    pub async fn fail_activity(
        &self,
        execution_id: ExecutionId,
        activity_id: &str,
        error_message: &str,
    ) -> Result<WorkflowExecution, FlowError> {
        let (execution, follow_up) = self.inner.fail_activity(execution_id, activity_id, error_message).await?;
        if let Some(task) = follow_up {
            self.inner.tasks.submit(task).await?;
        }
        Ok(execution)
    }

    pub async fn suspend_execution(&self, execution_id: ExecutionId) -> Result<WorkflowExecution, FlowError> {
        let inner = &self.inner;
        let _guard = inner.lock(execution_id).await;
        let mut execution = inner.load_execution(execution_id).await?;
        execution.suspend()?;
        inner.executions.update(&execution).await?;
        inner.events.emit(WorkflowEvent::ExecutionSuspended {
            execution_id,
            timestamp: Utc::now(),
        });
        tracing::info!(execution_id = %execution_id, "Suspended execution");
        Ok(execution)
    }

    /// Resume a suspended execution and re-drive it from its current
    /// activity.
    pub async fn resume_execution(&self, execution_id: ExecutionId) -> Result<WorkflowExecution, FlowError> {
        let inner = &self.inner;
        let (execution, follow_up) = {
            let _guard = inner.lock(execution_id).await;
            let mut execution = inner.load_execution(execution_id).await?;
            execution.resume()?;
            inner.executions.update(&execution).await?;
            let follow_up = redrive_task(&execution);
            (execution, follow_up)
        };

        inner.events.emit(WorkflowEvent::ExecutionResumed {
            execution_id,
            timestamp: Utc::now(),
        });
        tracing::info!(execution_id = %execution_id, "Resumed execution");
        if let Some(task) = follow_up {
            inner.tasks.submit(task).await?;
        }
        Ok(execution)
    }

    /// Cancel an execution. An activity handler already running is not
    /// interrupted; its result is discarded.
    pub async fn cancel_execution(&self, execution_id: ExecutionId) -> Result<WorkflowExecution, FlowError> {
        let inner = &self.inner;
        let execution = {
            let _guard = inner.lock(execution_id).await;
            let mut execution = inner.load_execution(execution_id).await?;
            execution.cancel()?;
            inner.executions.update(&execution).await?;
            execution
        };

        inner.events.emit(WorkflowEvent::ExecutionCancelled {
            execution_id,
            timestamp: Utc::now(),
        });
        tracing::info!(execution_id = %execution_id, "Cancelled execution");
        Ok(execution)
    }

    pub async fn set_context(
        &self,
        execution_id: ExecutionId,
        key: &str,
        value: serde_json::Value,
    ) -> Result<WorkflowExecution, FlowError> {
        let inner = &self.inner;
        let _guard = inner.lock(execution_id).await;
        let mut execution = inner.load_execution(execution_id).await?;
        execution.set_context(key, value)?;
        inner.executions.update(&execution).await?;
        Ok(execution)
    }

    /// Refresh liveness of an execution whose activity is still busy
    /// elsewhere.
    pub async fn heartbeat(&self, execution_id: ExecutionId) -> Result<(), FlowError> {
        let inner = &self.inner;
        let _guard = inner.lock(execution_id).await;
        let mut execution = inner.load_execution(execution_id).await?;
        execution.heartbeat();
        inner.executions.update(&execution).await?;
        Ok(())
    }

    // Queries

    pub async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow, FlowError> {
        self.inner.load_workflow(id).await
    }

    pub async fn find_workflow_by_name(&self, name: &str) -> Result<Option<Workflow>, FlowError> {
        Ok(self.inner.workflows.find_by_name(name).await?)
    }

    pub async fn list_workflows(
        &self,
        workflow_type: Option<WorkflowType>,
        active_only: bool,
    ) -> Result<Vec<Workflow>, FlowError> {
        let workflows = match workflow_type {
            Some(workflow_type) => self.inner.workflows.find_by_type(workflow_type, active_only).await?,
            None => self.inner.workflows.find_all(active_only).await?,
        };
        Ok(workflows)
    }

    pub async fn get_execution(&self, id: ExecutionId) -> Result<WorkflowExecution, FlowError> {
        self.inner.load_execution(id).await
    }

    pub async fn executions_for_workflow(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, FlowError> {
        Ok(self.inner.executions.find_by_workflow_id(workflow_id, limit).await?)
    }

    pub async fn executions_by_status(
        &self,
        status: ExecutionStatus,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, FlowError> {
        Ok(self.inner.executions.find_by_status(status, limit).await?)
    }

    pub async fn executions_for_entity(&self, entity: &EntityReference) -> Result<Vec<WorkflowExecution>, FlowError> {
        Ok(self
            .inner
            .executions
            .find_by_entity_reference(&entity.entity_type, &entity.entity_id)
            .await?)
    }

    pub async fn active_executions(&self, limit: usize) -> Result<Vec<WorkflowExecution>, FlowError> {
        Ok(self.inner.executions.find_active_executions(limit).await?)
    }

    /// Running executions without a heartbeat for `stale_after_minutes`
    /// (the configured threshold when `None`).
    pub async fn stale_executions(
        &self,
        stale_after_minutes: Option<i64>,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, FlowError> {
        let minutes = stale_after_minutes.unwrap_or(self.inner.config.stale_after_minutes);
        Ok(self.inner.executions.find_stale_executions(minutes, limit).await?)
    }

    pub async fn count_by_status(&self, status: ExecutionStatus) -> Result<usize, FlowError> {
        Ok(self.inner.executions.count_by_status(status).await?)
    }

    /// Executions with a command holding or waiting for their lock.
    pub fn locked_executions(&self) -> usize {
        self.inner.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Task that continues a resumed execution, if any.
fn redrive_task(execution: &WorkflowExecution) -> Option<Task> {
    let current = execution.current_activity_id.clone()?;
    let latest = execution
        .latest_activity(&current)
        .and_then(|index| execution.activity_record(index))
        .map(|record| record.status);
    match latest {
        Some(ActivityStatus::Completed) => Some(Task::ProcessTransition {
            execution_id: execution.id,
        }),
        Some(ActivityStatus::Waiting) => None,
        _ => Some(Task::RunActivity {
            execution_id: execution.id,
            activity_id: current,
        }),
    }
}

type LockTable = std::sync::Mutex<HashMap<ExecutionId, Arc<Mutex<()>>>>;

/// Per-execution lock. The table entry is dropped with the last guard, so
/// the table only holds executions somebody is working on.
struct ExecutionGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    execution_id: ExecutionId,
    table: &'a LockTable,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if table
            .get(&self.execution_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            table.remove(&self.execution_id);
        }
    }
}

struct Inner {
    workflows: Arc<dyn WorkflowRepository>,
    executions: Arc<dyn ExecutionRepository>,
    engine: Arc<dyn OrchestrationEngine>,
    failure_policy: Arc<dyn FailurePolicy>,
    ids: Arc<dyn IdGenerator>,
    events: EventBus,
    locks: LockTable,
    tasks: TaskSender,
    config: RuntimeConfig,
}

impl Inner {
    async fn lock(&self, execution_id: ExecutionId) -> ExecutionGuard<'_> {
        let lock = {
            let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            table.entry(execution_id).or_default().clone()
        };
        ExecutionGuard {
            guard: Some(lock.lock_owned().await),
            execution_id,
            table: &self.locks,
        }
    }

    async fn load_workflow(&self, id: WorkflowId) -> Result<Workflow, FlowError> {
        self.workflows
            .find_by_id(id)
            .await?
            .ok_or_else(|| FlowError::WorkflowNotFound(id.to_string()))
    }

    /// The definition an execution was started with.
    async fn load_definition(&self, execution: &WorkflowExecution) -> Result<Workflow, FlowError> {
        self.workflows
            .find_version(execution.workflow_id, &execution.workflow_version)
            .await?
            .ok_or_else(|| {
                FlowError::WorkflowNotFound(format!(
                    "{} (version {})",
                    execution.workflow_id, execution.workflow_version
                ))
            })
    }

    async fn load_execution(&self, id: ExecutionId) -> Result<WorkflowExecution, FlowError> {
        self.executions
            .find_by_id(id)
            .await?
            .ok_or_else(|| FlowError::ExecutionNotFound(id.to_string()))
    }

    /// Complete the in-flight `activity_id`. Returns the task that continues
    /// the execution, if it did not just finish.
    async fn complete_activity(
        &self,
        execution_id: ExecutionId,
        activity_id: &str,
        output: Context,
    ) -> Result<(WorkflowExecution, Option<Task>), FlowError> {
        let _guard = self.lock(execution_id).await;
        let mut execution = self.load_execution(execution_id).await?;
        execution.in_flight_activity(activity_id)?;
        let workflow = self.load_definition(&execution).await?;
        let output = workflow.get_activity(activity_id)?.map_output(output);

        let index = execution.complete_activity(activity_id, output.clone())?;
        let duration_ms = execution.activity_record(index).and_then(|r| r.duration_ms);
        self.executions.update(&execution).await?;
        self.events.emit(WorkflowEvent::ActivityCompleted {
            execution_id,
            activity_id: activity_id.to_string(),
            output: output.clone(),
            duration_ms,
            timestamp: Utc::now(),
        });
        tracing::debug!(execution_id = %execution_id, activity_id, "Activity completed");

        if !workflow.is_end_activity(activity_id) {
            return Ok((execution, Some(Task::ProcessTransition { execution_id })));
        }
        execution.complete(output)?;
        self.executions.update(&execution).await?;
        self.events.emit(WorkflowEvent::ExecutionCompleted {
            execution_id,
            timestamp: Utc::now(),
        });
        tracing::info!(execution_id = %execution_id, "Workflow execution completed");
        Ok((execution, None))
    }

    /// Fail the in-flight `activity_id` and apply the failure policy. A
    /// retry is scheduled here; the returned task compensates an escalated
    /// failure.
    async fn fail_activity(
        &self,
        execution_id: ExecutionId,
        activity_id: &str,
        error_message: &str,
    ) -> Result<(WorkflowExecution, Option<Task>), FlowError> {
        let (execution, decision, rollbacks) = {
            let _guard = self.lock(execution_id).await;
            let mut execution = self.load_execution(execution_id).await?;
            execution.in_flight_activity(activity_id)?;
            let workflow = self.load_definition(&execution).await?;
            let activity = workflow.get_activity(activity_id)?;

            execution.fail_activity(activity_id, error_message)?;
            self.executions.update(&execution).await?;
            self.events.emit(WorkflowEvent::ActivityFailed {
                execution_id,
                activity_id: activity_id.to_string(),
                error: error_message.to_string(),
                timestamp: Utc::now(),
            });
            tracing::warn!(execution_id = %execution_id, activity_id, error = error_message, "Activity failed");

            let decision = self.failure_policy.decide(activity, &execution);
            let mut rollbacks = Vec::new();
            match decision {
                FailureDecision::Retry { delay } => {
                    execution.record_retry()?;
                    self.executions.update(&execution).await?;
                    let attempt = execution.failed_attempts(activity_id) + 1;
                    self.events.emit(WorkflowEvent::ActivityRetrying {
                        execution_id,
                        activity_id: activity_id.to_string(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        timestamp: Utc::now(),
                    });
                    tracing::info!(
                        execution_id = %execution_id,
                        activity_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying activity"
                    );
                }
                FailureDecision::Escalate => {
                    let error = format!("Activity '{}' failed: {}", activity_id, error_message);
                    execution.fail(error.clone())?;
                    self.executions.update(&execution).await?;
                    self.events.emit(WorkflowEvent::ExecutionFailed {
                        execution_id,
                        error: error.clone(),
                        timestamp: Utc::now(),
                    });
                    tracing::error!(execution_id = %execution_id, "{}", error);
                    rollbacks = rollback_order(&workflow, &execution, activity_id);
                }
            }
            (execution, decision, rollbacks)
        };

        let follow_up = match decision {
            FailureDecision::Retry { delay } => {
                self.tasks.submit_after(
                    Task::RunActivity {
                        execution_id,
                        activity_id: activity_id.to_string(),
                    },
                    delay,
                );
                None
            }
            FailureDecision::Escalate if rollbacks.is_empty() => None,
            FailureDecision::Escalate => Some(Task::Rollback {
                execution_id,
                activity_ids: rollbacks,
            }),
        };
        Ok((execution, follow_up))
    }

    async fn run_activity(&self, execution_id: ExecutionId, activity_id: &str) -> Result<Option<Task>, FlowError> {
        let (execution, activity) = {
            let _guard = self.lock(execution_id).await;
            let mut execution = self.load_execution(execution_id).await?;
            if execution.status != ExecutionStatus::Running
                || execution.current_activity_id.as_deref() != Some(activity_id)
            {
                tracing::debug!(
                    execution_id = %execution_id,
                    activity_id,
                    status = %execution.status,
                    "Skipping activity, execution has moved on"
                );
                return Ok(None);
            }
            let workflow = self.load_definition(&execution).await?;
            let activity = workflow.get_activity(activity_id)?.clone();

            let input = activity.map_input(&execution.context);
            execution.start_activity(self.ids.next_id(), &activity.id, &activity.name, input)?;
            if activity.is_async {
                execution.mark_activity_waiting(&activity.id)?;
            }
            self.executions.update(&execution).await?;
            self.events.emit(WorkflowEvent::ActivityStarted {
                execution_id,
                activity_id: activity.id.clone(),
                is_async: activity.is_async,
                timestamp: Utc::now(),
            });

            if activity.is_async {
                tracing::debug!(execution_id = %execution_id, activity_id, "Waiting for external completion");
                return Ok(None);
            }
            (execution, activity)
        };

        tracing::debug!(execution_id = %execution_id, activity_id, handler = %activity.config.handler, "Running activity");
        let (_, follow_up) = match self.engine.execute_activity(&execution, &activity).await {
            Ok(output) => self.complete_activity(execution_id, &activity.id, output).await?,
            Err(e) => self.fail_activity(execution_id, &activity.id, &e.to_string()).await?,
        };
        Ok(follow_up)
    }

    async fn process_transition(&self, execution_id: ExecutionId) -> Result<Option<Task>, FlowError> {
        let _guard = self.lock(execution_id).await;
        let mut execution = self.load_execution(execution_id).await?;
        let current_completed = execution
            .current_activity_id
            .as_deref()
            .and_then(|current| execution.latest_activity(current))
            .and_then(|index| execution.activity_record(index))
            .is_some_and(|record| record.status == ActivityStatus::Completed);
        if execution.status != ExecutionStatus::Running || !current_completed {
            tracing::debug!(execution_id = %execution_id, status = %execution.status, "Skipping transition");
            return Ok(None);
        }

        let workflow = self.load_definition(&execution).await?;
        let next = self.engine.process_transition(&execution, &workflow)?;
        execution.move_to_next_activity(&next)?;
        self.executions.update(&execution).await?;
        tracing::debug!(execution_id = %execution_id, next = %next, "Moved to next activity");
        Ok(Some(Task::RunActivity {
            execution_id,
            activity_id: next,
        }))
    }

    async fn rollback(&self, execution_id: ExecutionId, activity_ids: &[String]) -> Result<(), FlowError> {
        let execution = self.load_execution(execution_id).await?;
        let workflow = self.load_definition(&execution).await?;
        for activity_id in activity_ids {
            let activity = workflow.get_activity(activity_id)?;
            match self.engine.rollback_activity(&execution, activity).await {
                Ok(()) => tracing::info!(execution_id = %execution_id, activity_id = %activity_id, "Rolled back activity"),
                Err(e) => {
                    tracing::error!(execution_id = %execution_id, activity_id = %activity_id, "Rollback failed: {}", e);
                    self.events.emit(WorkflowEvent::RollbackFailed {
                        execution_id,
                        activity_id: activity_id.clone(),
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Run one step of a task and return the step that follows it.
    async fn step(&self, task: Task) -> Result<Option<Task>, FlowError> {
        match task {
            Task::RunActivity {
                execution_id,
                activity_id,
            } => self.run_activity(execution_id, &activity_id).await,
            Task::ProcessTransition { execution_id } => self.process_transition(execution_id).await,
            Task::Rollback {
                execution_id,
                activity_ids,
            } => {
                self.rollback(execution_id, &activity_ids).await?;
                Ok(None)
            }
        }
    }

    async fn fail_execution(&self, execution_id: ExecutionId, error: &str) -> Result<(), FlowError> {
        {
            let _guard = self.lock(execution_id).await;
            let mut execution = self.load_execution(execution_id).await?;
            if execution.status.is_terminal() {
                tracing::warn!(execution_id = %execution_id, status = %execution.status, "Dropping task error: {}", error);
                return Ok(());
            }
            execution.fail(error)?;
            self.executions.update(&execution).await?;
        }
        self.events.emit(WorkflowEvent::ExecutionFailed {
            execution_id,
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

/// Activities to compensate after `failed` escalated: the failed activity
/// itself, then completed ones newest first, keeping those with a rollback.
fn rollback_order(workflow: &Workflow, execution: &WorkflowExecution, failed: &str) -> Vec<String> {
    let has_rollback = |id: &str| {
        workflow
            .get_activity(id)
            .map(|a| a.rollback.is_some())
            .unwrap_or(false)
    };
    std::iter::once(failed.to_string())
        .chain(
            execution
                .completed_activities_newest_first()
                .into_iter()
                .filter(|id| id != failed),
        )
        .filter(|id| has_rollback(id))
        .collect()
}

#[async_trait]
impl TaskRunner for Inner {
    /// Follow the execution step by step on this worker. Only a retry goes
    /// back through the queue, after its delay.
    async fn run(&self, task: Task) -> Result<(), FlowError> {
        let mut next = Some(task);
        while let Some(task) = next {
            if self.tasks.is_shut_down() {
                tracing::debug!(execution_id = %task.execution_id(), "Shutting down, leaving execution where it is");
                break;
            }
            next = self.step(task).await?;
        }
        Ok(())
    }

    async fn task_failed(&self, task: &Task, error: FlowError) {
        let execution_id = task.execution_id();
        if error.is_state_conflict() {
            tracing::warn!(execution_id = %execution_id, "Task no longer applies: {}", error);
            return;
        }
        tracing::error!(execution_id = %execution_id, "Task failed: {}", error);
        if let Err(e) = self.fail_execution(execution_id, &error.to_string()).await {
            tracing::error!(execution_id = %execution_id, "Could not record task failure: {}", e);
        }
    }
}
