use std::str::FromStr;

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub event_buffer_size: usize,
    /// Applied to activities that do not declare their own timeout
    pub default_activity_timeout_ms: Option<u64>,
    pub stale_after_minutes: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 1024,
            event_buffer_size: 1000,
            default_activity_timeout_ms: None,
            stale_after_minutes: 30,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `ORCH_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_value("ORCH_WORKERS") {
            config.worker_count = v;
        }
        if let Some(v) = env_value("ORCH_QUEUE_CAPACITY") {
            config.queue_capacity = v;
        }
        if let Some(v) = env_value("ORCH_EVENT_BUFFER") {
            config.event_buffer_size = v;
        }
        if let Some(v) = env_value("ORCH_ACTIVITY_TIMEOUT_MS") {
            config.default_activity_timeout_ms = Some(v);
        }
        if let Some(v) = env_value("ORCH_STALE_AFTER_MINUTES") {
            config.stale_after_minutes = v;
        }
        config
    }

    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }
}

fn env_value<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparsable configuration value");
            None
        }
    }
}
