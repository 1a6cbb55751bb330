//! Workflow execution runtime
//!
//! This crate provides the execution engine: template resolution, the node
//! registry, graph validation with branch-aware readiness, the per-run
//! execution context, and the runtime that starts, observes and cancels
//! executions.

mod context;
mod executor;
pub mod expression;
mod graph;
mod registry;
mod runtime;
mod store;

pub use context::ExecutionContext;
pub use executor::{ExecutionEnv, WorkflowExecutor};
pub use expression::{
    resolve_config, resolve_str, resolve_value, OutputSource, Reference, Segment, Template,
};
pub use graph::{GraphNode, NodeState, Readiness, WorkflowGraph};
pub use registry::NodeRegistry;
pub use runtime::{FlowRuntime, RuntimeConfig};
pub use store::{
    ExecutionRecord, ExecutionStore, InMemoryWorkflowStore, WorkflowStore,
    DEFAULT_RETAINED_EXECUTIONS,
};
