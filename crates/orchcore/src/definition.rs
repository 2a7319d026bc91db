use crate::execution::{lookup_path, Context};
use crate::DefinitionError;
use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

pub type WorkflowId = Uuid;
pub type ActivityId = String;

/// Business process families a definition can belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowType {
    Checkout,
    OrderFulfillment,
    PaymentProcessing,
    ReturnProcess,
    Custom,
}

impl Default for WorkflowType {
    fn default() -> Self {
        WorkflowType::Custom
    }
}

/// Workflow definition: a graph of activities joined by transitions.
///
/// Built incrementally with [`Workflow::add_activity`],
/// [`Workflow::add_transition`], [`Workflow::set_start_activity`] and
/// [`Workflow::add_end_activity`], then checked with [`Workflow::validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub description: Option<String>,
    pub workflow_type: WorkflowType,
    pub version: String,
    pub is_active: bool,
    pub activities: Vec<Activity>,
    pub transitions: Vec<Transition>,
    pub start_activity_id: Option<ActivityId>,
    pub end_activity_ids: Vec<ActivityId>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(id: WorkflowId, name: impl Into<String>, workflow_type: WorkflowType) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            description: None,
            workflow_type,
            version: "1".to_string(),
            is_active: true,
            activities: Vec::new(),
            transitions: Vec::new(),
            start_activity_id: None,
            end_activity_ids: Vec::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Build and validate a definition from a [`WorkflowSpec`].
    pub fn from_spec(id: WorkflowId, spec: WorkflowSpec) -> Result<Self, DefinitionError> {
        if spec.name.trim().is_empty() {
            return Err(DefinitionError::MissingField("name"));
        }
        let mut workflow = Workflow::new(id, spec.name.clone(), spec.workflow_type);
        if let Some(version) = &spec.version {
            workflow.version = version.clone();
        }
        workflow.apply_spec(spec)?;
        Ok(workflow)
    }

    /// Replace description, metadata and the whole activity graph with the
    /// content of `spec`, then validate. On error `self` is left untouched.
    pub fn replace_from_spec(&mut self, spec: WorkflowSpec) -> Result<(), DefinitionError> {
        let mut staged = self.clone();
        staged.activities.clear();
        staged.transitions.clear();
        staged.start_activity_id = None;
        staged.end_activity_ids.clear();
        staged.apply_spec(spec)?;
        staged.version = next_version(&self.version);
        *self = staged;
        Ok(())
    }

    fn apply_spec(&mut self, spec: WorkflowSpec) -> Result<(), DefinitionError> {
        self.description = spec.description;
        self.metadata = spec.metadata;
        for activity in spec.activities {
            self.add_activity(activity)?;
        }
        for transition in spec.transitions {
            self.add_transition(transition)?;
        }
        if !spec.start_activity_id.is_empty() {
            self.set_start_activity(&spec.start_activity_id)?;
        }
        for end in &spec.end_activity_ids {
            self.add_end_activity(end)?;
        }
        self.validate()
    }

    pub fn add_activity(&mut self, activity: Activity) -> Result<(), DefinitionError> {
        if activity.id.is_empty() {
            return Err(DefinitionError::MissingField("activity.id"));
        }
        if activity.name.is_empty() {
            return Err(DefinitionError::MissingField("activity.name"));
        }
        if self.has_activity(&activity.id) {
            return Err(DefinitionError::DuplicateActivityId(activity.id));
        }
        self.activities.push(activity);
        self.touch();
        Ok(())
    }

    pub fn add_transition(&mut self, transition: Transition) -> Result<(), DefinitionError> {
        self.require_activity(&transition.from_activity_id)?;
        self.require_activity(&transition.to_activity_id)?;
        self.transitions.push(transition);
        self.touch();
        Ok(())
    }

    pub fn set_start_activity(&mut self, activity_id: &str) -> Result<(), DefinitionError> {
        self.require_activity(activity_id)?;
        self.start_activity_id = Some(activity_id.to_string());
        self.touch();
        Ok(())
    }

    pub fn add_end_activity(&mut self, activity_id: &str) -> Result<(), DefinitionError> {
        self.require_activity(activity_id)?;
        if !self.is_end_activity(activity_id) {
            self.end_activity_ids.push(activity_id.to_string());
        }
        self.touch();
        Ok(())
    }

    /// Check structural invariants, reporting the first violation found.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let start = self
            .start_activity_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or(DefinitionError::MissingStartActivity)?;

        if self.end_activity_ids.is_empty() {
            return Err(DefinitionError::MissingEndActivities);
        }
        if self.activities.is_empty() {
            return Err(DefinitionError::NoActivities);
        }
        if !self.has_activity(start) {
            return Err(DefinitionError::StartActivityNotFound(start.to_string()));
        }
        if let Some(end) = self.end_activity_ids.iter().find(|id| !self.has_activity(id)) {
            return Err(DefinitionError::EndActivityNotFound(end.clone()));
        }
        if let Some(t) = self.transitions.iter().find(|t| {
            !self.has_activity(&t.from_activity_id) || !self.has_activity(&t.to_activity_id)
        }) {
            return Err(DefinitionError::DanglingTransition {
                from: t.from_activity_id.clone(),
                to: t.to_activity_id.clone(),
            });
        }
        Ok(())
    }

    pub fn get_activity(&self, activity_id: &str) -> Result<&Activity, DefinitionError> {
        self.activities
            .iter()
            .find(|a| a.id == activity_id)
            .ok_or_else(|| DefinitionError::ActivityNotFound(activity_id.to_string()))
    }

    /// Activities reachable over one transition from `current`, in transition
    /// declaration order. Conditions are not evaluated here.
    pub fn get_next_activities(&self, current: &str) -> Vec<&Activity> {
        self.transitions
            .iter()
            .filter(|t| t.from_activity_id == current)
            .filter_map(|t| self.get_activity(&t.to_activity_id).ok())
            .collect()
    }

    /// Transitions leaving `current`, in declaration order.
    pub fn outgoing_transitions(&self, current: &str) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.from_activity_id == current)
            .collect()
    }

    pub fn is_end_activity(&self, activity_id: &str) -> bool {
        self.end_activity_ids.iter().any(|id| id == activity_id)
    }

    /// Activities no path from the start activity can reach.
    pub fn unreachable_activities(&self) -> Vec<&Activity> {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let index: HashMap<&str, NodeIndex> = self
            .activities
            .iter()
            .map(|a| (a.id.as_str(), graph.add_node(a.id.as_str())))
            .collect();

        for t in &self.transitions {
            if let (Some(from), Some(to)) = (
                index.get(t.from_activity_id.as_str()),
                index.get(t.to_activity_id.as_str()),
            ) {
                graph.add_edge(*from, *to, ());
            }
        }
        for activity in &self.activities {
            for condition in &activity.config.conditions {
                if let (Some(from), Some(to)) = (
                    index.get(activity.id.as_str()),
                    index.get(condition.next_activity_id.as_str()),
                ) {
                    graph.add_edge(*from, *to, ());
                }
            }
        }

        let Some(start) = self
            .start_activity_id
            .as_deref()
            .and_then(|id| index.get(id))
        else {
            return self.activities.iter().collect();
        };

        let mut reached = vec![false; graph.node_count()];
        let mut bfs = Bfs::new(&graph, *start);
        while let Some(node) = bfs.next(&graph) {
            reached[node.index()] = true;
        }

        self.activities
            .iter()
            .filter(|a| !index.get(a.id.as_str()).map(|i| reached[i.index()]).unwrap_or(false))
            .collect()
    }

    pub fn activate(&mut self) {
        self.is_active = true;
        self.touch();
    }

    pub fn deactivate(&mut self) {
        self.is_active = false;
        self.touch();
    }

    fn has_activity(&self, activity_id: &str) -> bool {
        self.activities.iter().any(|a| a.id == activity_id)
    }

    fn require_activity(&self, activity_id: &str) -> Result<(), DefinitionError> {
        if self.has_activity(activity_id) {
            Ok(())
        } else {
            Err(DefinitionError::ActivityNotFound(activity_id.to_string()))
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Bump the trailing numeric segment of a version string.
pub fn next_version(version: &str) -> String {
    match version.rsplit_once('.') {
        Some((head, tail)) => match tail.parse::<u64>() {
            Ok(n) => format!("{}.{}", head, n + 1),
            Err(_) => format!("{}.1", version),
        },
        None => match version.parse::<u64>() {
            Ok(n) => (n + 1).to_string(),
            Err(_) => format!("{}.1", version),
        },
    }
}

/// Input for creating or replacing a workflow definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub version: Option<String>,
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    pub start_activity_id: ActivityId,
    pub end_activity_ids: Vec<ActivityId>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityType {
    Task,
    Decision,
    Parallel,
    Wait,
    SubWorkflow,
    Script,
}

/// One step of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub name: String,
    pub activity_type: ActivityType,
    #[serde(default)]
    pub order: u32,
    #[serde(default)]
    pub config: ActivityConfig,
    #[serde(default)]
    pub rollback: Option<RollbackConfig>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default)]
    pub is_async: bool,
}

impl Activity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, activity_type: ActivityType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            activity_type,
            order: 0,
            config: ActivityConfig::default(),
            rollback: None,
            timeout_ms: None,
            retry_policy: None,
            is_async: false,
        }
    }

    pub fn task(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, ActivityType::Task)
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.config.handler = handler.into();
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_input_mapping(mut self, target: impl Into<String>, source: impl Into<String>) -> Self {
        self.config.input_mapping.insert(target.into(), source.into());
        self
    }

    pub fn with_output_mapping(mut self, output_key: impl Into<String>, context_key: impl Into<String>) -> Self {
        self.config.output_mapping.insert(output_key.into(), context_key.into());
        self
    }

    pub fn with_condition(mut self, expression: impl Into<String>, next_activity_id: impl Into<String>) -> Self {
        self.config.conditions.push(DecisionCondition {
            expression: expression.into(),
            next_activity_id: next_activity_id.into(),
        });
        self
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_rollback(mut self, handler: impl Into<String>) -> Self {
        self.rollback = Some(RollbackConfig {
            handler: handler.into(),
            parameters: HashMap::new(),
        });
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// Input handed to the handler: the whole context when no mapping is
    /// configured, otherwise `target <- context[source]` per mapping entry.
    pub fn map_input(&self, context: &Context) -> Context {
        if self.config.input_mapping.is_empty() {
            return context.clone();
        }
        self.config
            .input_mapping
            .iter()
            .filter_map(|(target, source)| {
                lookup_path(context, source).map(|v| (target.clone(), v.clone()))
            })
            .collect()
    }

    /// Handler output as it should be merged into the context.
    pub fn map_output(&self, output: Context) -> Context {
        if self.config.output_mapping.is_empty() {
            return output;
        }
        self.config
            .output_mapping
            .iter()
            .filter_map(|(output_key, context_key)| {
                output.get(output_key).map(|v| (context_key.clone(), v.clone()))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityConfig {
    #[serde(default)]
    pub handler: String,
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub conditions: Vec<DecisionCondition>,
}

/// Branch of a decision activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionCondition {
    pub expression: String,
    pub next_activity_id: ActivityId,
}

/// Compensating handler run when the workflow fails after this activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConfig {
    pub handler: String,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    /// Delay before retrying after `attempt` failures (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_interval_ms as f64 * self.backoff_multiplier.max(1.0).powi(exponent);
        let capped = millis.min(self.max_interval_ms.max(self.initial_interval_ms) as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval_ms: 1000,
            max_interval_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Directed edge between two activities. Higher `priority` is tried first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from_activity_id: ActivityId,
    pub to_activity_id: ActivityId,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

impl Transition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_activity_id: from.into(),
            to_activity_id: to.into(),
            condition: None,
            priority: 0,
        }
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
