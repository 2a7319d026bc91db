use async_trait::async_trait;
use orchcore::{
    Activity, ActivityContext, ActivityError, ActivityHandler, ActivityStatus, Context,
    DefinitionError, ExecutionError, ExecutionStatus, FlowError, RetryPolicy, Transition,
    WorkflowEvent, WorkflowExecution, WorkflowSpec, WorkflowType,
};
use orchruntime::{EntityReference, HandlerRegistry, Orchestrator, RuntimeConfig, StartExecution};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Returns its static parameters as output
struct EchoHandler;

#[async_trait]
impl ActivityHandler for EchoHandler {
    fn handler_type(&self) -> &str {
        "test.echo"
    }

    async fn execute(&self, ctx: ActivityContext) -> Result<Context, ActivityError> {
        Ok(ctx.parameters.clone())
    }
}

/// Fails a fixed number of times, then succeeds
struct FlakyHandler {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl ActivityHandler for FlakyHandler {
    fn handler_type(&self) -> &str {
        "test.flaky"
    }

    async fn execute(&self, _ctx: ActivityContext) -> Result<Context, ActivityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(ActivityError::ExecutionFailed(format!("attempt {} declined", call + 1)));
        }
        let mut output = Context::new();
        output.insert("paid".to_string(), json!(true));
        Ok(output)
    }
}

/// Records the activities it compensates
#[derive(Default)]
struct RefundHandler {
    compensated: Mutex<Vec<String>>,
}

#[async_trait]
impl ActivityHandler for RefundHandler {
    fn handler_type(&self) -> &str {
        "test.refund"
    }

    async fn execute(&self, ctx: ActivityContext) -> Result<Context, ActivityError> {
        self.compensated.lock().unwrap().push(ctx.activity_id.clone());
        Ok(Context::new())
    }
}

/// Sleeps before echoing its parameters
struct SlowEchoHandler;

#[async_trait]
impl ActivityHandler for SlowEchoHandler {
    fn handler_type(&self) -> &str {
        "test.slow_echo"
    }

    async fn execute(&self, ctx: ActivityContext) -> Result<Context, ActivityError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(ctx.parameters.clone())
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    orchestrator: Orchestrator,
    flaky: Arc<FlakyHandler>,
    refunds: Arc<RefundHandler>,
}

fn harness(flaky_failures: usize) -> Harness {
    harness_with(flaky_failures, RuntimeConfig::default().with_workers(2))
}

fn harness_with(flaky_failures: usize, config: RuntimeConfig) -> Harness {
    init_tracing();
    let flaky = Arc::new(FlakyHandler {
        failures: flaky_failures,
        calls: AtomicUsize::new(0),
    });
    let refunds = Arc::new(RefundHandler::default());
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(EchoHandler));
    registry.register(flaky.clone());
    registry.register(refunds.clone());
    registry.register(Arc::new(SlowEchoHandler));

    Harness {
        orchestrator: Orchestrator::with_registry(Arc::new(registry), config),
        flaky,
        refunds,
    }
}

fn spec(name: &str, activities: Vec<Activity>, transitions: Vec<Transition>, end: &str) -> WorkflowSpec {
    WorkflowSpec {
        name: name.to_string(),
        workflow_type: WorkflowType::Checkout,
        start_activity_id: activities[0].id.clone(),
        end_activity_ids: vec![end.to_string()],
        activities,
        transitions,
        ..Default::default()
    }
}

fn review_spec(name: &str) -> WorkflowSpec {
    spec(
        name,
        vec![
            Activity::task("start", "Start").asynchronous(),
            Activity::task("review", "Review").asynchronous(),
            Activity::task("end", "End").asynchronous(),
        ],
        vec![Transition::new("start", "review"), Transition::new("review", "end")],
        "end",
    )
}

async fn wait_for(
    orchestrator: &Orchestrator,
    execution_id: Uuid,
    condition: impl Fn(&WorkflowExecution) -> bool,
) -> WorkflowExecution {
    for _ in 0..500 {
        let execution = orchestrator.get_execution(execution_id).await.unwrap();
        if condition(&execution) {
            return execution;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let execution = orchestrator.get_execution(execution_id).await.unwrap();
    panic!("condition not reached, execution is {:?}", execution.status);
}

fn waiting_on(activity_id: &'static str) -> impl Fn(&WorkflowExecution) -> bool {
    move |execution| {
        execution.current_activity_id.as_deref() == Some(activity_id)
            && execution
                .latest_activity(activity_id)
                .and_then(|index| execution.activity_record(index))
                .is_some_and(|record| record.status == ActivityStatus::Waiting)
    }
}

fn has_status(status: ExecutionStatus) -> impl Fn(&WorkflowExecution) -> bool {
    move |execution| execution.status == status
}

fn start_command(workflow_id: Uuid) -> StartExecution {
    let mut input = Context::new();
    input.insert("order_id".to_string(), json!("ORD-1"));
    StartExecution::new(workflow_id, input, "tester")
}

#[tokio::test]
async fn test_review_workflow_end_to_end() {
    let h = harness(0);
    let workflow = h.orchestrator.create_workflow(review_spec("review")).await.unwrap();

    let started = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap();
    assert_eq!(started.status, ExecutionStatus::Running);
    assert_eq!(started.workflow_version, "1");
    let id = started.id;

    wait_for(&h.orchestrator, id, waiting_on("start")).await;
    h.orchestrator.complete_activity(id, "start", Context::new()).await.unwrap();

    let execution = wait_for(&h.orchestrator, id, waiting_on("review")).await;
    assert_eq!(execution.status, ExecutionStatus::Running);

    let mut approval = Context::new();
    approval.insert("approved".to_string(), json!(true));
    let execution = h.orchestrator.complete_activity(id, "review", approval).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);

    wait_for(&h.orchestrator, id, waiting_on("end")).await;
    let execution = h.orchestrator.complete_activity(id, "end", Context::new()).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.get_context("approved"), Some(&json!(true)));
    assert_eq!(execution.get_context("order_id"), Some(&json!("ORD-1")));
    assert!(execution.completed_at.is_some());

    let err = h
        .orchestrator
        .complete_activity(id, "end", Context::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Execution(ExecutionError::NotRunning(ExecutionStatus::Completed))
    ));
}

#[tokio::test]
async fn test_sync_handlers_run_to_completion() {
    let h = harness(0);
    let mut events = h.orchestrator.subscribe_events();
    let workflow = h
        .orchestrator
        .create_workflow(spec(
            "sync",
            vec![
                Activity::task("reserve", "Reserve")
                    .with_handler("test.echo")
                    .with_parameter("reserved", true),
                Activity::task("ship", "Ship")
                    .with_handler("test.echo")
                    .with_parameter("tracking", "TRK-9")
                    .with_output_mapping("tracking", "tracking_number"),
            ],
            vec![Transition::new("reserve", "ship")],
            "ship",
        ))
        .await
        .unwrap();

    let id = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap()
        .id;
    let execution = wait_for(&h.orchestrator, id, has_status(ExecutionStatus::Completed)).await;

    assert_eq!(execution.get_context("reserved"), Some(&json!(true)));
    assert_eq!(execution.get_context("tracking_number"), Some(&json!("TRK-9")));
    assert!(execution.get_context("tracking").is_none());
    assert_eq!(execution.output_data.get("tracking_number"), Some(&json!("TRK-9")));
    assert_eq!(execution.activity_history.len(), 2);

    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("event stream stalled")
            .unwrap();
        if event.execution_id() != id {
            continue;
        }
        let done = matches!(event, WorkflowEvent::ExecutionCompleted { .. });
        seen.push(event);
        if done {
            break;
        }
    }
    assert!(matches!(seen.first(), Some(WorkflowEvent::ExecutionStarted { .. })));
    let completed_activities = seen
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::ActivityCompleted { .. }))
        .count();
    assert_eq!(completed_activities, 2);
}

#[tokio::test]
async fn test_failed_activity_is_retried() {
    let h = harness(2);
    let retry = RetryPolicy {
        max_attempts: 3,
        initial_interval_ms: 10,
        max_interval_ms: 20,
        backoff_multiplier: 2.0,
    };
    let workflow = h
        .orchestrator
        .create_workflow(spec(
            "retrying",
            vec![
                Activity::task("pay", "Pay").with_handler("test.flaky").with_retry(retry),
                Activity::task("done", "Done").with_handler("test.echo"),
            ],
            vec![Transition::new("pay", "done")],
            "done",
        ))
        .await
        .unwrap();

    let id = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap()
        .id;
    let execution = wait_for(&h.orchestrator, id, has_status(ExecutionStatus::Completed)).await;

    assert_eq!(h.flaky.calls.load(Ordering::SeqCst), 3);
    assert_eq!(execution.retry_count, 2);
    let attempts: Vec<ActivityStatus> = execution
        .activity_history
        .iter()
        .filter(|r| r.activity_id == "pay")
        .map(|r| r.status)
        .collect();
    assert_eq!(
        attempts,
        vec![ActivityStatus::Failed, ActivityStatus::Failed, ActivityStatus::Completed]
    );
    assert_eq!(execution.get_context("paid"), Some(&json!(true)));
}

#[tokio::test]
async fn test_escalation_fails_execution_and_runs_rollbacks() {
    let h = harness(usize::MAX);
    let workflow = h
        .orchestrator
        .create_workflow(spec(
            "compensating",
            vec![
                Activity::task("reserve", "Reserve")
                    .with_handler("test.echo")
                    .with_rollback("test.refund"),
                Activity::task("notify", "Notify").with_handler("test.echo"),
                Activity::task("charge", "Charge")
                    .with_handler("test.flaky")
                    .with_rollback("test.refund"),
                Activity::task("done", "Done").with_handler("test.echo"),
            ],
            vec![
                Transition::new("reserve", "notify"),
                Transition::new("notify", "charge"),
                Transition::new("charge", "done"),
            ],
            "done",
        ))
        .await
        .unwrap();

    let id = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap()
        .id;
    let execution = wait_for(&h.orchestrator, id, has_status(ExecutionStatus::Failed)).await;
    assert!(execution.error_message.unwrap().contains("charge"));
    assert_eq!(h.flaky.calls.load(Ordering::SeqCst), 1);

    for _ in 0..500 {
        if h.refunds.compensated.lock().unwrap().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let compensated = h.refunds.compensated.lock().unwrap().clone();
    assert_eq!(compensated, vec!["charge".to_string(), "reserve".to_string()]);
}

#[tokio::test]
async fn test_no_valid_transition_fails_execution() {
    let h = harness(0);
    let workflow = h
        .orchestrator
        .create_workflow(spec(
            "gated",
            vec![
                Activity::task("check", "Check")
                    .with_handler("test.echo")
                    .with_parameter("approved", false),
                Activity::task("done", "Done").with_handler("test.echo"),
            ],
            vec![Transition::new("check", "done").when("approved == true")],
            "done",
        ))
        .await
        .unwrap();

    let id = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap()
        .id;
    let execution = wait_for(&h.orchestrator, id, has_status(ExecutionStatus::Failed)).await;
    assert!(execution
        .error_message
        .unwrap()
        .contains("No valid transition from activity: check"));
    assert_eq!(execution.current_activity_id.as_deref(), Some("check"));
}

#[tokio::test]
async fn test_suspend_and_resume() {
    let h = harness(0);
    let workflow = h
        .orchestrator
        .create_workflow(spec(
            "approval",
            vec![
                Activity::task("submit", "Submit").with_handler("test.echo"),
                Activity::task("approve", "Approve").asynchronous(),
                Activity::task("close", "Close").with_handler("test.echo"),
            ],
            vec![Transition::new("submit", "approve"), Transition::new("approve", "close")],
            "close",
        ))
        .await
        .unwrap();

    let id = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap()
        .id;
    wait_for(&h.orchestrator, id, waiting_on("approve")).await;

    let suspended = h.orchestrator.suspend_execution(id).await.unwrap();
    assert_eq!(suspended.status, ExecutionStatus::Suspended);
    let err = h
        .orchestrator
        .complete_activity(id, "approve", Context::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Execution(ExecutionError::NotRunning(ExecutionStatus::Suspended))
    ));
    assert!(h.orchestrator.suspend_execution(id).await.is_err());

    let resumed = h.orchestrator.resume_execution(id).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Running);
    assert!(matches!(
        h.orchestrator.resume_execution(id).await,
        Err(FlowError::Execution(ExecutionError::NotSuspended(ExecutionStatus::Running)))
    ));

    h.orchestrator.complete_activity(id, "approve", Context::new()).await.unwrap();
    let execution = wait_for(&h.orchestrator, id, has_status(ExecutionStatus::Completed)).await;
    let approvals = execution
        .activity_history
        .iter()
        .filter(|r| r.activity_id == "approve")
        .count();
    assert_eq!(approvals, 1);
}

#[tokio::test]
async fn test_cancel_and_terminal_immutability() {
    let h = harness(0);
    let workflow = h.orchestrator.create_workflow(review_spec("cancellable")).await.unwrap();
    let id = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap()
        .id;
    wait_for(&h.orchestrator, id, waiting_on("start")).await;

    let cancelled = h.orchestrator.cancel_execution(id).await.unwrap();
    assert_eq!(cancelled.status, ExecutionStatus::Cancelled);
    assert!(matches!(
        h.orchestrator.cancel_execution(id).await,
        Err(FlowError::Execution(ExecutionError::AlreadyCancelled))
    ));
    assert!(matches!(
        h.orchestrator.set_context(id, "note", json!("late")).await,
        Err(FlowError::Execution(ExecutionError::AlreadyFinished(ExecutionStatus::Cancelled)))
    ));
    assert!(h
        .orchestrator
        .complete_activity(id, "start", Context::new())
        .await
        .is_err());
    h.orchestrator.heartbeat(id).await.unwrap();
}

#[tokio::test]
async fn test_set_context_on_running_execution() {
    let h = harness(0);
    let workflow = h.orchestrator.create_workflow(review_spec("notes")).await.unwrap();
    let id = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap()
        .id;

    let execution = h.orchestrator.set_context(id, "priority", json!("high")).await.unwrap();
    assert_eq!(execution.get_context("priority"), Some(&json!("high")));
    let stored = h.orchestrator.get_execution(id).await.unwrap();
    assert_eq!(stored.get_context("priority"), Some(&json!("high")));
}

#[tokio::test]
async fn test_create_workflow_rejects_duplicates_and_invalid_specs() {
    let h = harness(0);
    h.orchestrator.create_workflow(review_spec("checkout")).await.unwrap();
    assert!(matches!(
        h.orchestrator.create_workflow(review_spec("checkout")).await,
        Err(FlowError::AlreadyExists(name)) if name == "checkout"
    ));

    let mut no_end = review_spec("no-end");
    no_end.end_activity_ids.clear();
    assert!(matches!(
        h.orchestrator.create_workflow(no_end).await,
        Err(FlowError::Definition(DefinitionError::MissingEndActivities))
    ));
    assert!(h.orchestrator.find_workflow_by_name("no-end").await.unwrap().is_none());

    let mut duplicated = review_spec("duplicated");
    duplicated.activities.push(Activity::task("review", "Review Again"));
    assert!(matches!(
        h.orchestrator.create_workflow(duplicated).await,
        Err(FlowError::Definition(DefinitionError::DuplicateActivityId(_)))
    ));
    assert!(h.orchestrator.find_workflow_by_name("duplicated").await.unwrap().is_none());
    assert_eq!(h.orchestrator.list_workflows(None, false).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_start_requires_existing_active_workflow() {
    let h = harness(0);
    assert!(matches!(
        h.orchestrator.start_workflow_execution(start_command(Uuid::new_v4())).await,
        Err(FlowError::WorkflowNotFound(_))
    ));

    let workflow = h.orchestrator.create_workflow(review_spec("gate")).await.unwrap();
    h.orchestrator.deactivate_workflow(workflow.id).await.unwrap();
    assert!(matches!(
        h.orchestrator.start_workflow_execution(start_command(workflow.id)).await,
        Err(FlowError::Inactive(_))
    ));
    assert!(h.orchestrator.list_workflows(None, true).await.unwrap().is_empty());

    h.orchestrator.activate_workflow(workflow.id).await.unwrap();
    assert!(h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_update_does_not_affect_running_executions() {
    let h = harness(0);
    let workflow = h.orchestrator.create_workflow(review_spec("versioned")).await.unwrap();
    let id = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap()
        .id;
    wait_for(&h.orchestrator, id, waiting_on("start")).await;

    let mut replacement = review_spec("versioned");
    replacement.activities.push(Activity::task("audit", "Audit").asynchronous());
    replacement.transitions = vec![
        Transition::new("start", "audit"),
        Transition::new("audit", "review"),
        Transition::new("review", "end"),
    ];
    let updated = h.orchestrator.update_workflow(workflow.id, replacement).await.unwrap();
    assert_eq!(updated.version, "2");

    h.orchestrator.complete_activity(id, "start", Context::new()).await.unwrap();
    let execution = wait_for(&h.orchestrator, id, waiting_on("review")).await;
    assert_eq!(execution.workflow_version, "1");

    let fresh = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap();
    assert_eq!(fresh.workflow_version, "2");
}

#[tokio::test]
async fn test_update_and_delete_unknown_workflow() {
    let h = harness(0);
    assert!(matches!(
        h.orchestrator.update_workflow(Uuid::new_v4(), review_spec("x")).await,
        Err(FlowError::WorkflowNotFound(_))
    ));
    assert!(matches!(
        h.orchestrator.delete_workflow(Uuid::new_v4()).await,
        Err(FlowError::WorkflowNotFound(_))
    ));

    let workflow = h.orchestrator.create_workflow(review_spec("short-lived")).await.unwrap();
    h.orchestrator.delete_workflow(workflow.id).await.unwrap();
    assert!(matches!(
        h.orchestrator.get_workflow(workflow.id).await,
        Err(FlowError::WorkflowNotFound(_))
    ));
}

#[tokio::test]
async fn test_execution_queries() {
    let h = harness(0);
    let workflow = h.orchestrator.create_workflow(review_spec("queried")).await.unwrap();
    let order = EntityReference::new("order", "ORD-7");

    let first = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id).for_entity(order.clone()))
        .await
        .unwrap();
    let second = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap();
    h.orchestrator.cancel_execution(second.id).await.unwrap();

    let for_entity = h.orchestrator.executions_for_entity(&order).await.unwrap();
    assert_eq!(for_entity.len(), 1);
    assert_eq!(for_entity[0].id, first.id);
    assert_eq!(for_entity[0].entity_id.as_deref(), Some("ORD-7"));

    assert_eq!(h.orchestrator.executions_for_workflow(workflow.id, 10).await.unwrap().len(), 2);
    assert_eq!(h.orchestrator.count_by_status(ExecutionStatus::Cancelled).await.unwrap(), 1);
    assert_eq!(h.orchestrator.count_by_status(ExecutionStatus::Running).await.unwrap(), 1);
    let active = h.orchestrator.active_executions(10).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, first.id);
    assert_eq!(
        h.orchestrator
            .executions_by_status(ExecutionStatus::Cancelled, 10)
            .await
            .unwrap()[0]
            .id,
        second.id
    );
    assert!(h.orchestrator.stale_executions(None, 10).await.unwrap().is_empty());
    assert!(h
        .orchestrator
        .stale_executions(Some(i64::MAX), 10)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        h.orchestrator.get_execution(Uuid::new_v4()).await,
        Err(FlowError::ExecutionNotFound(_))
    ));
}

#[tokio::test]
async fn test_shutdown_rejects_new_work() {
    let h = harness(0);
    let workflow = h.orchestrator.create_workflow(review_spec("stopping")).await.unwrap();
    h.orchestrator.shutdown().await;

    assert!(matches!(
        h.orchestrator.start_workflow_execution(start_command(workflow.id)).await,
        Err(FlowError::Shutdown)
    ));
}

#[tokio::test]
async fn test_late_result_for_finished_activity_is_rejected() {
    let h = harness(0);
    let workflow = h.orchestrator.create_workflow(review_spec("late")).await.unwrap();
    let id = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap()
        .id;

    wait_for(&h.orchestrator, id, waiting_on("start")).await;
    h.orchestrator.complete_activity(id, "start", Context::new()).await.unwrap();
    wait_for(&h.orchestrator, id, waiting_on("review")).await;

    assert!(matches!(
        h.orchestrator.complete_activity(id, "start", Context::new()).await,
        Err(FlowError::Execution(ExecutionError::NotCurrentActivity(activity))) if activity == "start"
    ));
    assert!(matches!(
        h.orchestrator.fail_activity(id, "start", "too late").await,
        Err(FlowError::Execution(ExecutionError::NotCurrentActivity(_)))
    ));
    assert!(matches!(
        h.orchestrator.complete_activity(id, "end", Context::new()).await,
        Err(FlowError::Execution(ExecutionError::NotCurrentActivity(_)))
    ));

    tokio::time::sleep(Duration::from_millis(50)).await;
    let execution = h.orchestrator.get_execution(id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert_eq!(execution.current_activity_id.as_deref(), Some("review"));
    let history: Vec<(&str, ActivityStatus)> = execution
        .activity_history
        .iter()
        .map(|r| (r.activity_id.as_str(), r.status))
        .collect();
    assert_eq!(
        history,
        vec![("start", ActivityStatus::Completed), ("review", ActivityStatus::Waiting)]
    );

    h.orchestrator.complete_activity(id, "review", Context::new()).await.unwrap();
    wait_for(&h.orchestrator, id, waiting_on("end")).await;
    assert!(matches!(
        h.orchestrator.complete_activity(id, "review", Context::new()).await,
        Err(FlowError::Execution(ExecutionError::NotCurrentActivity(_)))
    ));
}

#[tokio::test]
async fn test_full_queue_does_not_stall_workers() {
    let mut config = RuntimeConfig::default().with_workers(1);
    config.queue_capacity = 1;
    let h = harness_with(0, config);
    let workflow = h
        .orchestrator
        .create_workflow(spec(
            "saturated",
            vec![
                Activity::task("pick", "Pick").with_handler("test.slow_echo"),
                Activity::task("pack", "Pack").with_handler("test.slow_echo"),
            ],
            vec![Transition::new("pick", "pack")],
            "pack",
        ))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let started = tokio::time::timeout(
            Duration::from_secs(5),
            h.orchestrator.start_workflow_execution(start_command(workflow.id)),
        )
        .await
        .expect("start blocked on a stalled queue")
        .unwrap();
        ids.push(started.id);
    }
    for id in ids {
        wait_for(&h.orchestrator, id, has_status(ExecutionStatus::Completed)).await;
    }
    assert_eq!(h.orchestrator.count_by_status(ExecutionStatus::Completed).await.unwrap(), 3);
}

#[tokio::test]
async fn test_lock_table_only_tracks_busy_executions() {
    let h = harness(0);
    let unknown = Uuid::new_v4();
    assert!(h.orchestrator.set_context(unknown, "k", json!(1)).await.is_err());
    assert!(h.orchestrator.heartbeat(unknown).await.is_err());
    assert!(h.orchestrator.suspend_execution(unknown).await.is_err());
    assert!(h.orchestrator.complete_activity(unknown, "start", Context::new()).await.is_err());
    assert_eq!(h.orchestrator.locked_executions(), 0);

    let workflow = h.orchestrator.create_workflow(review_spec("tracked")).await.unwrap();
    let id = h
        .orchestrator
        .start_workflow_execution(start_command(workflow.id))
        .await
        .unwrap()
        .id;
    wait_for(&h.orchestrator, id, waiting_on("start")).await;
    h.orchestrator.cancel_execution(id).await.unwrap();
    h.orchestrator.heartbeat(id).await.unwrap();

    for _ in 0..100 {
        if h.orchestrator.locked_executions() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.orchestrator.locked_executions(), 0);
}
