use async_trait::async_trait;
use orchcore::{ActivityContext, ActivityError, ActivityHandler, Context, HandlerMetadata};
use tokio::time::{sleep, Duration};

/// Waits `delay_ms` (default one second), then passes its input through
pub struct DelayHandler;

#[async_trait]
impl ActivityHandler for DelayHandler {
    fn handler_type(&self) -> &str {
        "time.delay"
    }

    async fn execute(&self, ctx: ActivityContext) -> Result<Context, ActivityError> {
        let delay_ms = match ctx.input_or_parameter("delay_ms") {
            None => 1000,
            Some(value) => value.as_u64().ok_or_else(|| {
                ActivityError::Configuration(format!("delay_ms must be a non-negative integer, got {}", value))
            })?,
        };

        ctx.events.progress(format!("Delaying for {}ms", delay_ms));
        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => Ok(ctx.input.clone()),
            _ = ctx.cancellation.cancelled() => Err(ActivityError::Cancelled),
        }
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
        }
    }
}
