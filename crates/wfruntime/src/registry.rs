use std::collections::HashMap;
use std::sync::Arc;
use wfcore::{NodeExecutor, NodeMetadata, NodeSpec, WorkflowError};

/// Registry of available node types
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register an executor under its type tag, replacing any previous one.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        let node_type = executor.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        self.executors.insert(node_type, executor);
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    /// Check that a node's type is registered and its static config is acceptable.
    pub fn validate_node(&self, node: &NodeSpec) -> Result<Arc<dyn NodeExecutor>, WorkflowError> {
        let executor = self.get(&node.node_type).ok_or_else(|| WorkflowError::UnsupportedNodeType {
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
        })?;

        executor
            .validate_config(&node.config)
            .map_err(|source| WorkflowError::InvalidNodeConfig {
                node_id: node.id.clone(),
                source,
            })?;

        Ok(executor)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.executors.get(node_type).map(|e| e.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
