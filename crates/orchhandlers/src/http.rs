use async_trait::async_trait;
use orchcore::{ActivityContext, ActivityError, ActivityHandler, Context, HandlerMetadata};
use serde_json::Value;

/// HTTP request handler. `url`, `method`, `body` and `headers` are read from
/// the input first, then from the parameters.
pub struct HttpRequestHandler {
    client: reqwest::Client,
}

impl HttpRequestHandler {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityHandler for HttpRequestHandler {
    fn handler_type(&self) -> &str {
        "http.request"
    }

    async fn execute(&self, ctx: ActivityContext) -> Result<Context, ActivityError> {
        let url = ctx
            .input_or_parameter("url")
            .ok_or_else(|| ActivityError::MissingInput("url".to_string()))?
            .as_str()
            .ok_or_else(|| ActivityError::Configuration("url must be a string".to_string()))?
            .to_string();
        let method = ctx
            .input_or_parameter("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();

        ctx.events.progress(format!("{} {}", method, url));

        let mut request = match method.as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            "DELETE" => self.client.delete(&url),
            _ => return Err(ActivityError::Configuration(format!("Unsupported method: {}", method))),
        };

        match ctx.input_or_parameter("body") {
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(Value::Null) | None => {}
            Some(json) => request = request.json(json),
        }

        if let Some(Value::Object(headers)) = ctx.input_or_parameter("headers") {
            for (key, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(key.as_str(), value);
                }
            }
        }

        let response = tokio::select! {
            response = request.send() => response
                .map_err(|e| ActivityError::ExecutionFailed(format!("HTTP request failed: {}", e)))?,
            _ = ctx.cancellation.cancelled() => return Err(ActivityError::Cancelled),
        };

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| ActivityError::ExecutionFailed(format!("Failed to read response: {}", e)))?;
        tracing::debug!(url = %url, status = status.as_u16(), "HTTP response");

        // JSON bodies are kept structured so conditions can look into them
        let body = serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));

        let mut output = Context::new();
        output.insert("status".to_string(), Value::from(status.as_u16()));
        output.insert("body".to_string(), body);
        output.insert("success".to_string(), Value::Bool(status.is_success()));
        Ok(output)
    }

    fn metadata(&self) -> HandlerMetadata {
        HandlerMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
        }
    }
}
