use crate::{ActivityError, Context, EventEmitter, ExecutionId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Business logic behind an activity. The engine decides when a handler
/// runs; the handler only turns input into output.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    /// Identifier referenced by `ActivityConfig::handler` (e.g. "http.request")
    fn handler_type(&self) -> &str;

    async fn execute(&self, ctx: ActivityContext) -> Result<Context, ActivityError>;

    /// Compensate a previously completed run
    async fn rollback(&self, _ctx: ActivityContext) -> Result<(), ActivityError> {
        Ok(())
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata::default()
    }
}

/// Everything a handler gets to see for one invocation
#[derive(Clone)]
pub struct ActivityContext {
    pub execution_id: ExecutionId,
    pub activity_id: String,
    pub input: Context,
    pub parameters: HashMap<String, serde_json::Value>,
    pub events: EventEmitter,
    pub cancellation: CancellationToken,
}

impl ActivityContext {
    pub fn require_input(&self, name: &str) -> Result<&serde_json::Value, ActivityError> {
        self.input
            .get(name)
            .ok_or_else(|| ActivityError::MissingInput(name.to_string()))
    }

    /// Look a value up in the input first, then in the static parameters.
    pub fn input_or_parameter(&self, name: &str) -> Option<&serde_json::Value> {
        self.input.get(name).or_else(|| self.parameters.get(name))
    }

    pub fn require_parameter(&self, name: &str) -> Result<&serde_json::Value, ActivityError> {
        self.parameters
            .get(name)
            .ok_or_else(|| ActivityError::Configuration(format!("Missing parameter: {}", name)))
    }
}

#[derive(Debug, Clone)]
pub struct HandlerMetadata {
    pub description: String,
    pub category: String,
}

impl Default for HandlerMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
        }
    }
}
