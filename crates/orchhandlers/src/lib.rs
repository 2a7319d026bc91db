//! Standard activity handlers
//!
//! Collection of built-in handlers for common operations

mod debug;
mod http;
mod time;
mod transform;

pub use debug::DebugHandler;
pub use http::HttpRequestHandler;
pub use time::DelayHandler;
pub use transform::{JsonParseHandler, SetHandler};

use orchruntime::HandlerRegistry;
use std::sync::Arc;

/// Register all standard handlers with a registry
pub fn register_all(registry: &mut HandlerRegistry) {
    registry.register(Arc::new(DebugHandler));
    registry.register(Arc::new(HttpRequestHandler::new()));
    registry.register(Arc::new(DelayHandler));
    registry.register(Arc::new(SetHandler));
    registry.register(Arc::new(JsonParseHandler));
}
