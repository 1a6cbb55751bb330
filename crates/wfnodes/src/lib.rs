//! Standard node library
//!
//! Built-in node types: `http_request`, `delay` and `conditional`.

mod conditional;
mod http;
mod time;

pub use conditional::{ConditionalNode, Operator};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpRequestNode, HttpResponse, ReqwestClient};
pub use time::DelayNode;
use wfruntime::NodeRegistry;

use std::sync::Arc;
use std::time::Duration;
use wfcore::NodeError;

/// Seconds from node config as a `Duration`; rejects values too large to represent.
pub(crate) fn seconds(field: &str, secs: f64) -> Result<Duration, NodeError> {
    Duration::try_from_secs_f64(secs).map_err(|_| {
        NodeError::invalid(field, "representable number of seconds", secs.to_string())
    })
}

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(HttpRequestNode::new()));
    registry.register(Arc::new(DelayNode));
    registry.register(Arc::new(ConditionalNode));
}

/// Registry holding every standard node.
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
