// crates/orchcli/src/main.rs

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use orchcore::{
    Activity, ActivityType, Context, ExecutionStatus, RetryPolicy, Transition, Workflow,
    WorkflowEvent, WorkflowSpec, WorkflowType,
};
use orchruntime::{HandlerRegistry, Orchestrator, RuntimeConfig, StartExecution};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orch")]
#[command(about = "Workflow orchestration CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Input data as JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Number of workers (defaults to ORCH_WORKERS or 4)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available activity handlers
    Handlers,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            verbose,
            workers,
        } => {
            init_logging(verbose);
            run_workflow(&file, input, workers).await?;
        }

        Commands::Validate { file } => {
            validate_workflow(&file)?;
        }

        Commands::Handlers => {
            list_handlers();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

/// `RUST_LOG` wins over the verbosity flag when set
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn standard_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    orchhandlers::register_all(&mut registry);
    registry
}

fn load_spec(file: &Path) -> Result<WorkflowSpec> {
    let raw = std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))
}

fn parse_input(input: Option<String>) -> Result<Context> {
    let Some(raw) = input else {
        return Ok(Context::new());
    };
    match serde_json::from_str(&raw)? {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        _ => bail!("Input must be a JSON object"),
    }
}

async fn run_workflow(file: &Path, input: Option<String>, workers: Option<usize>) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());
    let spec = load_spec(file)?;
    let input = parse_input(input)?;

    let mut config = RuntimeConfig::from_env();
    if let Some(workers) = workers {
        config = config.with_workers(workers);
    }
    let orchestrator = Orchestrator::with_registry(Arc::new(standard_registry()), config);

    let workflow = orchestrator.create_workflow(spec).await?;
    println!("📋 Workflow: {} (version {})", workflow.name, workflow.version);
    println!("   Activities: {}", workflow.activities.len());
    println!("   Transitions: {}", workflow.transitions.len());
    println!();

    let mut events = orchestrator.subscribe_events();
    let execution = orchestrator
        .start_workflow_execution(StartExecution::new(workflow.id, input, "orch-cli"))
        .await?;
    let execution_id = execution.id;

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("Missed {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if event.execution_id() != execution_id {
            continue;
        }

        match event {
            WorkflowEvent::ExecutionStarted { .. } => println!("▶️  Execution started"),
            WorkflowEvent::ActivityStarted {
                activity_id,
                is_async,
                ..
            } => {
                println!("  ⚡ Starting activity: {}", activity_id);
                if is_async {
                    // Nobody else will report back, so finish it here.
                    println!("  ⏩ Completing async activity {}", activity_id);
                    orchestrator
                        .complete_activity(execution_id, &activity_id, Context::new())
                        .await?;
                }
            }
            WorkflowEvent::ActivityCompleted {
                activity_id,
                duration_ms,
                ..
            } => {
                println!("  ✅ Activity {} completed in {}ms", activity_id, duration_ms.unwrap_or(0));
            }
            WorkflowEvent::ActivityFailed { activity_id, error, .. } => {
                println!("  ❌ Activity {} failed: {}", activity_id, error);
            }
            WorkflowEvent::ActivityRetrying {
                activity_id,
                attempt,
                delay_ms,
                ..
            } => {
                println!("  🔁 Retrying {} (attempt {}) in {}ms", activity_id, attempt, delay_ms);
            }
            WorkflowEvent::ActivityProgress {
                activity_id, message, ..
            } => {
                println!("     ℹ️  [{}] {}", activity_id, message);
            }
            WorkflowEvent::RollbackFailed { activity_id, error, .. } => {
                println!("  ⚠️  Rollback of {} failed: {}", activity_id, error);
            }
            WorkflowEvent::ExecutionCompleted { .. } => {
                println!("✨ Execution completed successfully");
                break;
            }
            WorkflowEvent::ExecutionFailed { error, .. } => {
                println!("💥 Execution failed: {}", error);
                break;
            }
            WorkflowEvent::ExecutionCancelled { .. } => {
                println!("🛑 Execution cancelled");
                break;
            }
            WorkflowEvent::ExecutionSuspended { .. } | WorkflowEvent::ExecutionResumed { .. } => {}
        }
    }

    // Give background rollbacks a moment to report
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    let execution = orchestrator.get_execution(execution_id).await?;
    orchestrator.shutdown().await;

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", execution.id);
    println!("   Status: {}", execution.status);
    println!("   Activities run: {}", execution.activity_history.len());
    if !execution.context.is_empty() {
        println!();
        println!("📤 Context:");
        let mut keys: Vec<&String> = execution.context.keys().collect();
        keys.sort();
        for key in keys {
            println!("   {}: {}", key, execution.context[key]);
        }
    }

    if execution.status == ExecutionStatus::Failed {
        bail!(
            "execution failed: {}",
            execution.error_message.unwrap_or_default()
        );
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let spec = load_spec(file)?;
    let workflow = Workflow::from_spec(uuid::Uuid::new_v4(), spec)?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Activities: {}", workflow.activities.len());
    println!("   Transitions: {}", workflow.transitions.len());

    for activity in workflow.unreachable_activities() {
        println!("⚠️  Activity '{}' is unreachable from the start activity", activity.id);
    }

    let registry = standard_registry();
    for activity in &workflow.activities {
        let handler = &activity.config.handler;
        if !handler.is_empty() && registry.get(handler).is_none() {
            println!("⚠️  Activity '{}' uses unknown handler '{}'", activity.id, handler);
        }
    }

    Ok(())
}

fn list_handlers() {
    println!("📦 Available Activity Handlers:");
    println!();

    let registry = standard_registry();
    for handler_type in registry.list_handler_types() {
        if let Some(metadata) = registry.get_metadata(&handler_type) {
            println!("  • {} ({})", handler_type, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", handler_type);
        }
    }
}

fn example_checkout() -> WorkflowSpec {
    let activities = vec![
        Activity::task("validate_cart", "Validate Cart")
            .with_handler("transform.set")
            .with_parameter("cart_valid", true),
        Activity::new("route_order", "Route Order", ActivityType::Decision)
            .with_condition("total > 1000", "manual_review"),
        Activity::task("manual_review", "Manual Review").asynchronous(),
        Activity::task("charge_payment", "Charge Payment")
            .with_handler("time.delay")
            .with_parameter("delay_ms", 200)
            .with_retry(RetryPolicy::default())
            .with_rollback("debug.log")
            .with_timeout(5_000),
        Activity::task("confirm_order", "Confirm Order")
            .with_handler("debug.log")
            .with_parameter("message", "Order confirmed"),
    ];

    WorkflowSpec {
        name: "Example Checkout".to_string(),
        description: Some("Validates a cart, reviews large orders and charges the customer".to_string()),
        workflow_type: WorkflowType::Checkout,
        activities,
        transitions: vec![
            Transition::new("validate_cart", "route_order").when("cart_valid"),
            Transition::new("route_order", "charge_payment"),
            Transition::new("manual_review", "charge_payment"),
            Transition::new("charge_payment", "confirm_order"),
        ],
        start_activity_id: "validate_cart".to_string(),
        end_activity_ids: vec!["confirm_order".to_string()],
        ..Default::default()
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&example_checkout())?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  orch run --file {} --input '{{\"total\": 1500}}'", output.display());

    Ok(())
}
