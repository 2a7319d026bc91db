use async_trait::async_trait;
use orchcore::{ActivityContext, ActivityError, ActivityHandler, Context, HandlerMetadata};
use serde_json::Value;

/// Logs its input and echoes `message`
pub struct DebugHandler;

#[async_trait]
impl ActivityHandler for DebugHandler {
    fn handler_type(&self) -> &str {
        "debug.log"
    }

    async fn execute(&self, ctx: ActivityContext) -> Result<Context, ActivityError> {
        let message = ctx
            .input_or_parameter("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)")
            .to_string();

        tracing::info!(execution_id = %ctx.execution_id, activity_id = %ctx.activity_id, "DEBUG: {}", message);
        for (key, value) in &ctx.input {
            tracing::debug!("  {}: {}", key, value);
        }
        ctx.events.progress(format!("DEBUG: {}", message));

        let mut output = Context::new();
        output.insert("message".to_string(), Value::String(message));
        Ok(output)
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Logs input values for debugging".to_string(),
            category: "debug".to_string(),
        }
    }
}
