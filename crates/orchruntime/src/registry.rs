use orchcore::{ActivityHandler, HandlerMetadata};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available activity handlers
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActivityHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous one with the same type
    pub fn register(&mut self, handler: Arc<dyn ActivityHandler>) {
        let handler_type = handler.handler_type().to_string();
        tracing::info!("Registering activity handler: {}", handler_type);
        self.handlers.insert(handler_type, handler);
    }

    pub fn get(&self, handler_type: &str) -> Option<Arc<dyn ActivityHandler>> {
        self.handlers.get(handler_type).cloned()
    }

    /// Registered handler types, sorted
    pub fn list_handler_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn get_metadata(&self, handler_type: &str) -> Option<HandlerMetadata> {
        self.handlers.get(handler_type).map(|h| h.metadata())
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
