//! Storage interfaces for workflow definitions and executions.
//!
//! The core only depends on these traits; storage engines live elsewhere.
//! `orchruntime::store` provides in-memory implementations.

use crate::{ExecutionId, ExecutionStatus, RepositoryError, Workflow, WorkflowExecution, WorkflowId, WorkflowType};
use async_trait::async_trait;

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Store a new definition. `Conflict` if the id is taken.
    async fn create(&self, workflow: &Workflow) -> Result<(), RepositoryError>;

    /// Replace the latest definition and keep a snapshot of its version.
    async fn update(&self, workflow: &Workflow) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, RepositoryError>;

    /// Snapshot of a definition as it was at `version`.
    async fn find_version(&self, id: WorkflowId, version: &str) -> Result<Option<Workflow>, RepositoryError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Workflow>, RepositoryError>;

    async fn find_by_type(
        &self,
        workflow_type: WorkflowType,
        active_only: bool,
    ) -> Result<Vec<Workflow>, RepositoryError>;

    async fn find_all(&self, active_only: bool) -> Result<Vec<Workflow>, RepositoryError>;

    /// `NotFound` if the id is unknown.
    async fn delete(&self, id: WorkflowId) -> Result<(), RepositoryError>;

    async fn exists_by_name(&self, name: &str) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError>;

    async fn update(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<WorkflowExecution>, RepositoryError>;

    async fn find_by_workflow_id(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError>;

    async fn find_by_status(
        &self,
        status: ExecutionStatus,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError>;

    async fn find_by_entity_reference(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError>;

    /// Executions that have not reached a terminal status.
    async fn find_active_executions(&self, limit: usize) -> Result<Vec<WorkflowExecution>, RepositoryError>;

    /// Running executions whose heartbeat is older than `stale_after_minutes`.
    async fn find_stale_executions(
        &self,
        stale_after_minutes: i64,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError>;

    async fn delete(&self, id: ExecutionId) -> Result<(), RepositoryError>;

    async fn count_by_status(&self, status: ExecutionStatus) -> Result<usize, RepositoryError>;
}
