use crate::{Context, ExecutionId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted while executions move through their lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkflowEvent {
    ExecutionStarted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        workflow_version: String,
        timestamp: DateTime<Utc>,
    },
    ActivityStarted {
        execution_id: ExecutionId,
        activity_id: String,
        is_async: bool,
        timestamp: DateTime<Utc>,
    },
    ActivityCompleted {
        execution_id: ExecutionId,
        activity_id: String,
        output: Context,
        duration_ms: Option<i64>,
        timestamp: DateTime<Utc>,
    },
    ActivityFailed {
        execution_id: ExecutionId,
        activity_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ActivityRetrying {
        execution_id: ExecutionId,
        activity_id: String,
        attempt: u32,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ActivityProgress {
        execution_id: ExecutionId,
        activity_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionCompleted {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    ExecutionFailed {
        execution_id: ExecutionId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionSuspended {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    ExecutionResumed {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    ExecutionCancelled {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    RollbackFailed {
        execution_id: ExecutionId,
        activity_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            WorkflowEvent::ExecutionStarted { execution_id, .. }
            | WorkflowEvent::ActivityStarted { execution_id, .. }
            | WorkflowEvent::ActivityCompleted { execution_id, .. }
            | WorkflowEvent::ActivityFailed { execution_id, .. }
            | WorkflowEvent::ActivityRetrying { execution_id, .. }
            | WorkflowEvent::ActivityProgress { execution_id, .. }
            | WorkflowEvent::ExecutionCompleted { execution_id, .. }
            | WorkflowEvent::ExecutionFailed { execution_id, .. }
            | WorkflowEvent::ExecutionSuspended { execution_id, .. }
            | WorkflowEvent::ExecutionResumed { execution_id, .. }
            | WorkflowEvent::ExecutionCancelled { execution_id, .. }
            | WorkflowEvent::RollbackFailed { execution_id, .. } => *execution_id,
        }
    }
}

/// Event emitter handed to activity handlers for progress updates
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    activity_id: String,
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        activity_id: impl Into<String>,
        sender: broadcast::Sender<WorkflowEvent>,
    ) -> Self {
        Self {
            execution_id,
            activity_id: activity_id.into(),
            sender,
        }
    }

    pub fn progress(&self, message: impl Into<String>) {
        let _ = self.sender.send(WorkflowEvent::ActivityProgress {
            execution_id: self.execution_id,
            activity_id: self.activity_id.clone(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }
}

/// In-process event bus. Sending with no subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, activity_id: impl Into<String>) -> EventEmitter {
        EventEmitter::new(execution_id, activity_id, self.sender.clone())
    }
}
