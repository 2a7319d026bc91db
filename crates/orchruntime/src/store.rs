//! In-memory repositories, used by tests and the CLI.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use orchcore::{
    ExecutionId, ExecutionRepository, ExecutionStatus, RepositoryError, Workflow,
    WorkflowExecution, WorkflowId, WorkflowRepository, WorkflowType,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct WorkflowTables {
    latest: HashMap<WorkflowId, Workflow>,
    versions: HashMap<(WorkflowId, String), Workflow>,
}

#[derive(Default)]
pub struct InMemoryWorkflowRepository {
    tables: RwLock<WorkflowTables>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T>(mut items: Vec<T>, created_at: impl Fn(&T) -> chrono::DateTime<Utc>) -> Vec<T> {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
    items
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn create(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.latest.contains_key(&workflow.id) {
            return Err(RepositoryError::Conflict(workflow.id.to_string()));
        }
        tables
            .versions
            .insert((workflow.id, workflow.version.clone()), workflow.clone());
        tables.latest.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn update(&self, workflow: &Workflow) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if !tables.latest.contains_key(&workflow.id) {
            return Err(RepositoryError::NotFound(workflow.id.to_string()));
        }
        tables
            .versions
            .insert((workflow.id, workflow.version.clone()), workflow.clone());
        tables.latest.insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.tables.read().await.latest.get(&id).cloned())
    }

    async fn find_version(&self, id: WorkflowId, version: &str) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .versions
            .get(&(id, version.to_string()))
            .cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .latest
            .values()
            .find(|w| w.name == name)
            .cloned())
    }

    async fn find_by_type(
        &self,
        workflow_type: WorkflowType,
        active_only: bool,
    ) -> Result<Vec<Workflow>, RepositoryError> {
        let tables = self.tables.read().await;
        let found = tables
            .latest
            .values()
            .filter(|w| w.workflow_type == workflow_type && (!active_only || w.is_active))
            .cloned()
            .collect();
        Ok(newest_first(found, |w| w.created_at))
    }

    async fn find_all(&self, active_only: bool) -> Result<Vec<Workflow>, RepositoryError> {
        let tables = self.tables.read().await;
        let found = tables
            .latest
            .values()
            .filter(|w| !active_only || w.is_active)
            .cloned()
            .collect();
        Ok(newest_first(found, |w| w.created_at))
    }

    async fn delete(&self, id: WorkflowId) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.latest.remove(&id).is_none() {
            return Err(RepositoryError::NotFound(id.to_string()));
        }
        tables.versions.retain(|(workflow_id, _), _| *workflow_id != id);
        Ok(())
    }

    async fn exists_by_name(&self, name: &str) -> Result<bool, RepositoryError> {
        Ok(self
            .tables
            .read()
            .await
            .latest
            .values()
            .any(|w| w.name == name))
    }
}

#[derive(Default)]
pub struct InMemoryExecutionRepository {
    executions: RwLock<HashMap<ExecutionId, WorkflowExecution>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn select(
        &self,
        limit: usize,
        predicate: impl Fn(&WorkflowExecution) -> bool,
    ) -> Vec<WorkflowExecution> {
        let executions = self.executions.read().await;
        let found = executions.values().filter(|e| predicate(e)).cloned().collect();
        let mut found = newest_first(found, |e| e.created_at);
        found.truncate(limit);
        found
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict(execution.id.to_string()));
        }
        executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &WorkflowExecution) -> Result<(), RepositoryError> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.id) {
            Some(stored) => {
                *stored = execution.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(execution.id.to_string())),
        }
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<WorkflowExecution>, RepositoryError> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn find_by_workflow_id(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        Ok(self.select(limit, |e| e.workflow_id == workflow_id).await)
    }

    async fn find_by_status(
        &self,
        status: ExecutionStatus,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        Ok(self.select(limit, |e| e.status == status).await)
    }

    async fn find_by_entity_reference(
        &self,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        Ok(self
            .select(usize::MAX, |e| {
                e.entity_type.as_deref() == Some(entity_type) && e.entity_id.as_deref() == Some(entity_id)
            })
            .await)
    }

    async fn find_active_executions(&self, limit: usize) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        Ok(self.select(limit, |e| !e.status.is_terminal()).await)
    }

    async fn find_stale_executions(
        &self,
        stale_after_minutes: i64,
        limit: usize,
    ) -> Result<Vec<WorkflowExecution>, RepositoryError> {
        // A threshold beyond chrono's range reaches back further than any heartbeat.
        let Some(threshold) = Duration::try_minutes(stale_after_minutes) else {
            return Ok(Vec::new());
        };
        let now = Utc::now();
        Ok(self.select(limit, |e| e.is_stale(threshold, now)).await)
    }

    async fn delete(&self, id: ExecutionId) -> Result<(), RepositoryError> {
        match self.executions.write().await.remove(&id) {
            Some(_) => Ok(()),
            None => Err(RepositoryError::NotFound(id.to_string())),
        }
    }

    async fn count_by_status(&self, status: ExecutionStatus) -> Result<usize, RepositoryError> {
        Ok(self
            .executions
            .read()
            .await
            .values()
            .filter(|e| e.status == status)
            .count())
    }
}
