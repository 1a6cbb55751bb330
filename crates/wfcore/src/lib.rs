//! Core abstractions for the workflow engine
//!
//! This crate provides the data model (workflows, executions, logs), the
//! error taxonomy and the node executor contract that every other crate
//! depends on. It does not run anything itself.

mod error;
pub mod events;
mod execution;
mod node;
mod value;
mod workflow;

pub use error::{ExecutionError, ExpressionError, FlowError, NodeError, WorkflowError};
pub use events::*;
pub use execution::{Execution, ExecutionId, ExecutionLog, ExecutionStatus, LogLevel};
pub use node::{
    ConfigField, IntegrationLookup, NoIntegrations, NodeContext, NodeExecutor, NodeMetadata,
    NodeOutcome,
};
pub use value::{Value, ValueExt, ValueMap};
pub use workflow::{
    Branch, Edge, ErrorPolicy, NodeId, NodeSpec, Position, TriggerEvent, TriggerType,
    WorkflowDefinition, WorkflowId, WorkflowSettings,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
