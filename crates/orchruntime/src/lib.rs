//! Workflow orchestration runtime
//!
//! This crate provides the command handler that drives executions, the
//! handler registry, the default engine and condition language, failure
//! policies, the supervised worker pool and in-memory storage.

mod condition;
mod config;
mod engine;
mod orchestrator;
mod policy;
mod pool;
mod registry;
pub mod store;
mod transition;

pub use condition::ExpressionEvaluator;
pub use config::RuntimeConfig;
pub use engine::DefaultEngine;
pub use orchestrator::{EntityReference, Orchestrator, OrchestratorBuilder, StartExecution};
pub use policy::{FailFast, FailureDecision, FailurePolicy, RetryPolicyStrategy};
pub use pool::{Task, TaskRunner, TaskSender, WorkerPool};
pub use registry::HandlerRegistry;
pub use store::{InMemoryExecutionRepository, InMemoryWorkflowRepository};
pub use transition::select_transition;
