use crate::execution::{ExecutionId, ExecutionStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required config: {0}")]
    MissingConfig(String),

    #[error("Invalid value for '{field}': expected {expected}, got {actual}")]
    InvalidConfig {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Expression(#[from] ExpressionError),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timed out after {seconds}s")]
    Timeout { seconds: f64 },

    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn invalid(
        field: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        NodeError::InvalidConfig {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

/// Errors raised while resolving `{{node.path}}` templates.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Unresolved reference '{reference}': {reason}")]
    UnresolvedReference { reference: String, reason: String },

    #[error("Invalid reference '{0}'")]
    InvalidReference(String),
}

/// Validation failures. A graph that produces one of these never runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Cyclic dependency detected")]
    CyclicDependency,

    #[error("Edge {from} -> {to} references unknown node '{missing}'")]
    DanglingEdge {
        from: String,
        to: String,
        missing: String,
    },

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("Unsupported node type '{node_type}' on node {node_id}")]
    UnsupportedNodeType { node_id: String, node_type: String },

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Invalid config for node {node_id}: {source}")]
    InvalidNodeConfig { node_id: String, source: NodeError },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Execution not found: {0}")]
    NotFound(ExecutionId),

    #[error("Execution {id} already finished with status {status}")]
    AlreadyTerminal {
        id: ExecutionId,
        status: ExecutionStatus,
    },

    #[error("Execution {0} is already running")]
    AlreadyRunning(ExecutionId),

    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
}
