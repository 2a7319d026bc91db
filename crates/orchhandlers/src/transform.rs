use async_trait::async_trait;
use orchcore::{ActivityContext, ActivityError, ActivityHandler, Context, HandlerMetadata};
use serde_json::Value;

/// Returns its static parameters as output, e.g. to seed flags into the
/// context
pub struct SetHandler;

#[async_trait]
impl ActivityHandler for SetHandler {
    fn handler_type(&self) -> &str {
        "transform.set"
    }

    async fn execute(&self, ctx: ActivityContext) -> Result<Context, ActivityError> {
        Ok(ctx.parameters.into_iter().collect())
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Write static values into the context".to_string(),
            category: "transform".to_string(),
        }
    }
}

/// Parse a JSON string
pub struct JsonParseHandler;

#[async_trait]
impl ActivityHandler for JsonParseHandler {
    fn handler_type(&self) -> &str {
        "transform.json_parse"
    }

    async fn execute(&self, ctx: ActivityContext) -> Result<Context, ActivityError> {
        let input = ctx
            .require_input("json")?
            .as_str()
            .ok_or_else(|| ActivityError::ExecutionFailed("json input must be a string".to_string()))?;

        let parsed: Value = serde_json::from_str(input)
            .map_err(|e| ActivityError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        let mut output = Context::new();
        output.insert("parsed".to_string(), parsed);
        Ok(output)
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
        }
    }
}
