use crate::{events::EventEmitter, ExecutionId, NodeError, NodeId, Value, ValueExt, ValueMap};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Core trait that every node type implements.
///
/// Executors are registered once per type tag and shared by all executions,
/// so they must not keep per-run state.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Type tag used in workflow definitions (e.g. `http_request`).
    fn node_type(&self) -> &str;

    /// Run the node against its already-resolved config.
    ///
    /// Implementations that suspend must watch `ctx.cancellation` and return
    /// [`NodeError::Cancelled`] promptly when it fires.
    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError>;

    /// Check the static (unresolved) config at validation time.
    fn validate_config(&self, _config: &ValueMap) -> Result<(), NodeError> {
        Ok(())
    }

    /// Branching nodes produce `{"result": bool}` and may own branch-tagged edges.
    fn is_branching(&self) -> bool {
        false
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Result of running a single node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    Completed(Value),
    Failed(String),
    /// Aborted by a cancellation request before producing output.
    Cancelled,
}

impl From<Result<Value, NodeError>> for NodeOutcome {
    fn from(result: Result<Value, NodeError>) -> Self {
        match result {
            Ok(output) => NodeOutcome::Completed(output),
            Err(NodeError::Cancelled) => NodeOutcome::Cancelled,
            Err(e) => NodeOutcome::Failed(e.to_string()),
        }
    }
}

/// Opaque access to integration records (credentials, base headers, ...).
/// Storage of those records lives outside the engine.
#[async_trait]
pub trait IntegrationLookup: Send + Sync {
    async fn get_integration(&self, id: &str) -> Option<Value>;
}

/// Lookup that knows no integrations.
pub struct NoIntegrations;

#[async_trait]
impl IntegrationLookup for NoIntegrations {
    async fn get_integration(&self, _id: &str) -> Option<Value> {
        None
    }
}

/// Execution context passed to each node
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: ExecutionId,

    pub node_id: NodeId,

    /// Config with every template already resolved
    pub config: ValueMap,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Fires when the execution is cancelled
    pub cancellation: CancellationToken,

    pub integrations: Arc<dyn IntegrationLookup>,
}

impl NodeContext {
    /// Context outside any execution, mostly for driving executors directly.
    pub fn new(node_id: impl Into<NodeId>, config: ValueMap) -> Self {
        let node_id = node_id.into();
        Self {
            execution_id: ExecutionId::nil(),
            events: EventEmitter::detached(node_id.clone()),
            node_id,
            config,
            cancellation: CancellationToken::new(),
            integrations: Arc::new(NoIntegrations),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn with_integrations(mut self, integrations: Arc<dyn IntegrationLookup>) -> Self {
        self.integrations = integrations;
        self
    }

    /// Get required config value or return error
    pub fn require_config(&self, name: &str) -> Result<&Value, NodeError> {
        match self.config.get(name) {
            Some(Value::Null) | None => Err(NodeError::MissingConfig(name.to_string())),
            Some(value) => Ok(value),
        }
    }

    pub fn require_str(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require_config(name)?;
        value
            .as_str()
            .ok_or_else(|| NodeError::invalid(name, "string", value.type_name()))
    }

    /// Optional numeric config; numeric strings are accepted.
    pub fn get_f64(&self, name: &str) -> Result<Option<f64>, NodeError> {
        match self.config.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .to_f64_lossy()
                .map(Some)
                .ok_or_else(|| NodeError::invalid(name, "number", value.type_name())),
        }
    }

    /// Get config with default
    pub fn get_config_or(&self, name: &str, default: Value) -> Value {
        self.config.get(name).cloned().unwrap_or(default)
    }
}

/// Descriptive information about a node type, shown by `wf nodes` and `/api/nodes`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub config: Vec<ConfigField>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            config: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigField {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ConfigField {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
        }
    }
}
