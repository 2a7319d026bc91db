use crate::definition::WorkflowId;
use crate::ExecutionError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Working memory of an execution
pub type Context = HashMap<String, serde_json::Value>;

/// Resolve a dotted path (`order.total`) against a context.
pub fn lookup_path<'a>(context: &'a Context, path: &str) -> Option<&'a serde_json::Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Suspended,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Suspended => "suspended",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Waiting,
}

/// One attempt at running an activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityExecution {
    pub id: Uuid,
    pub activity_id: String,
    pub activity_name: String,
    pub status: ActivityStatus,
    pub input_data: Context,
    pub output_data: Context,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

impl ActivityExecution {
    fn finish(&mut self, status: ActivityStatus) {
        let now = Utc::now();
        self.status = status;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
    }
}

/// Stable handle to an entry of an execution's activity history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryIndex(pub usize);

/// Runtime instance of a workflow definition.
///
/// History entries are only appended; the single exception is the latest
/// entry for an activity, which is finished in place by
/// [`WorkflowExecution::complete_activity`] and
/// [`WorkflowExecution::fail_activity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub workflow_version: String,
    pub status: ExecutionStatus,
    pub context: Context,
    pub input_data: Context,
    pub output_data: Context,
    pub current_activity_id: Option<String>,
    pub activity_history: Vec<ActivityExecution>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub started_by: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat: DateTime<Utc>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowExecution {
    pub fn new(
        id: ExecutionId,
        workflow_id: WorkflowId,
        workflow_version: impl Into<String>,
        input: Context,
        started_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            workflow_id,
            workflow_version: workflow_version.into(),
            status: ExecutionStatus::Pending,
            context: input.clone(),
            input_data: input,
            output_data: Context::new(),
            current_activity_id: None,
            activity_history: Vec::new(),
            error_message: None,
            retry_count: 0,
            started_by: started_by.into(),
            started_at: None,
            completed_at: None,
            last_heartbeat: now,
            entity_type: None,
            entity_id: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn start(&mut self, start_activity_id: &str) -> Result<(), ExecutionError> {
        if self.status != ExecutionStatus::Pending {
            return Err(ExecutionError::NotPendingState(self.status));
        }
        self.status = ExecutionStatus::Running;
        self.current_activity_id = Some(start_activity_id.to_string());
        self.started_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Append a fresh `Running` record for `activity_id`.
    pub fn start_activity(
        &mut self,
        record_id: Uuid,
        activity_id: &str,
        activity_name: &str,
        input: Context,
    ) -> Result<HistoryIndex, ExecutionError> {
        self.ensure_running()?;
        self.activity_history.push(ActivityExecution {
            id: record_id,
            activity_id: activity_id.to_string(),
            activity_name: activity_name.to_string(),
            status: ActivityStatus::Running,
            input_data: input,
            output_data: Context::new(),
            error_message: None,
            retry_count: 0,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        });
        self.current_activity_id = Some(activity_id.to_string());
        self.touch();
        Ok(HistoryIndex(self.activity_history.len() - 1))
    }

    /// Park the latest record of an asynchronous activity until an external
    /// completion or failure arrives.
    pub fn mark_activity_waiting(&mut self, activity_id: &str) -> Result<HistoryIndex, ExecutionError> {
        self.ensure_running()?;
        let index = self.require_latest(activity_id)?;
        self.activity_history[index.0].status = ActivityStatus::Waiting;
        self.touch();
        Ok(index)
    }

    pub fn complete_activity(
        &mut self,
        activity_id: &str,
        output: Context,
    ) -> Result<HistoryIndex, ExecutionError> {
        self.ensure_running()?;
        let index = self.require_latest(activity_id)?;

        for (key, value) in &output {
            self.context.insert(key.clone(), value.clone());
        }
        let record = &mut self.activity_history[index.0];
        record.output_data = output;
        record.finish(ActivityStatus::Completed);
        self.touch();
        Ok(index)
    }

    pub fn fail_activity(
        &mut self,
        activity_id: &str,
        error_message: impl Into<String>,
    ) -> Result<HistoryIndex, ExecutionError> {
        self.ensure_running()?;
        let index = self.require_latest(activity_id)?;

        let record = &mut self.activity_history[index.0];
        record.error_message = Some(error_message.into());
        record.retry_count += 1;
        record.finish(ActivityStatus::Failed);
        self.touch();
        Ok(index)
    }

    /// The latest record of `activity_id`, provided it is the current
    /// activity and still waits for its result.
    pub fn in_flight_activity(&self, activity_id: &str) -> Result<HistoryIndex, ExecutionError> {
        self.ensure_running()?;
        if self.current_activity_id.as_deref() != Some(activity_id) {
            return Err(ExecutionError::NotCurrentActivity(activity_id.to_string()));
        }
        let index = self.require_latest(activity_id)?;
        match self.activity_history[index.0].status {
            ActivityStatus::Running | ActivityStatus::Waiting => Ok(index),
            status => Err(ExecutionError::ActivityNotInFlight {
                activity_id: activity_id.to_string(),
                status,
            }),
        }
    }

    /// Count a retry of the current activity against the execution.
    pub fn record_retry(&mut self) -> Result<u32, ExecutionError> {
        self.ensure_running()?;
        self.retry_count += 1;
        self.touch();
        Ok(self.retry_count)
    }

    pub fn move_to_next_activity(&mut self, activity_id: &str) -> Result<(), ExecutionError> {
        self.ensure_running()?;
        self.current_activity_id = Some(activity_id.to_string());
        self.touch();
        Ok(())
    }

    pub fn complete(&mut self, output: Context) -> Result<(), ExecutionError> {
        self.ensure_running()?;
        self.status = ExecutionStatus::Completed;
        self.output_data = output;
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    pub fn fail(&mut self, error_message: impl Into<String>) -> Result<(), ExecutionError> {
        if self.status.is_terminal() {
            return Err(ExecutionError::AlreadyFinished(self.status));
        }
        self.status = ExecutionStatus::Failed;
        self.error_message = Some(error_message.into());
        self.completed_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    pub fn suspend(&mut self) -> Result<(), ExecutionError> {
        self.ensure_running()?;
        self.status = ExecutionStatus::Suspended;
        self.touch();
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), ExecutionError> {
        if self.status != ExecutionStatus::Suspended {
            return Err(ExecutionError::NotSuspended(self.status));
        }
        self.status = ExecutionStatus::Running;
        self.touch();
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), ExecutionError> {
        match self.status {
            ExecutionStatus::Completed => Err(ExecutionError::AlreadyCompleted),
            ExecutionStatus::Cancelled => Err(ExecutionError::AlreadyCancelled),
            ExecutionStatus::Failed => Err(ExecutionError::AlreadyFinished(self.status)),
            _ => {
                self.status = ExecutionStatus::Cancelled;
                self.completed_at = Some(Utc::now());
                self.touch();
                Ok(())
            }
        }
    }

    pub fn heartbeat(&mut self) {
        self.last_heartbeat = Utc::now();
    }

    pub fn set_context(&mut self, key: impl Into<String>, value: serde_json::Value) -> Result<(), ExecutionError> {
        if self.status.is_terminal() {
            return Err(ExecutionError::AlreadyFinished(self.status));
        }
        self.context.insert(key.into(), value);
        self.touch();
        Ok(())
    }

    pub fn get_context(&self, key: &str) -> Option<&serde_json::Value> {
        self.context.get(key)
    }

    /// Index of the newest history entry for `activity_id`.
    pub fn latest_activity(&self, activity_id: &str) -> Option<HistoryIndex> {
        self.activity_history
            .iter()
            .rposition(|r| r.activity_id == activity_id)
            .map(HistoryIndex)
    }

    pub fn activity_record(&self, index: HistoryIndex) -> Option<&ActivityExecution> {
        self.activity_history.get(index.0)
    }

    /// Failed attempts of `activity_id` since it last completed.
    pub fn failed_attempts(&self, activity_id: &str) -> u32 {
        self.activity_history
            .iter()
            .rev()
            .filter(|r| r.activity_id == activity_id)
            .take_while(|r| r.status != ActivityStatus::Completed)
            .filter(|r| r.status == ActivityStatus::Failed)
            .count() as u32
    }

    /// Ids of completed activities, most recently completed first, without
    /// repeats.
    pub fn completed_activities_newest_first(&self) -> Vec<String> {
        let mut seen = Vec::new();
        let completed = self
            .activity_history
            .iter()
            .rev()
            .filter(|r| r.status == ActivityStatus::Completed);
        for record in completed {
            if !seen.contains(&record.activity_id) {
                seen.push(record.activity_id.clone());
            }
        }
        seen
    }

    pub fn is_stale(&self, stale_after: Duration, now: DateTime<Utc>) -> bool {
        self.status == ExecutionStatus::Running
            && now
                .checked_sub_signed(stale_after)
                .is_some_and(|cutoff| self.last_heartbeat < cutoff)
    }

    fn require_latest(&self, activity_id: &str) -> Result<HistoryIndex, ExecutionError> {
        self.latest_activity(activity_id)
            .ok_or_else(|| ExecutionError::ActivityExecutionNotFound(activity_id.to_string()))
    }

    fn ensure_running(&self) -> Result<(), ExecutionError> {
        if self.status == ExecutionStatus::Running {
            Ok(())
        } else {
            Err(ExecutionError::NotRunning(self.status))
        }
    }

    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = now;
        self.last_heartbeat = now;
    }
}
