use crate::{Value, ValueMap};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type WorkflowId = Uuid;

/// Node ids are authored in the editor (`node_1`, `fetch`, ...) and are only
/// unique within one workflow.
pub type NodeId = String;

/// Complete workflow definition as handed over by the workflow store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: WorkflowId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Bumped by the store whenever nodes or edges change.
    #[serde(default = "default_version")]
    pub version: u32,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            version: default_version(),
            nodes: Vec::new(),
            edges: Vec::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> NodeId {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Unconditional continuation `from -> to`.
    pub fn connect(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) {
        self.edges.push(Edge::new(from, to));
    }

    /// Branch edge leaving a conditional node.
    pub fn connect_branch(
        &mut self,
        from: impl Into<NodeId>,
        branch: Branch,
        to: impl Into<NodeId>,
    ) {
        self.edges.push(Edge::new(from, to).with_branch(branch));
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub config: ValueMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default)]
    pub on_error: ErrorPolicy,
}

impl NodeSpec {
    pub fn new(id: impl Into<NodeId>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            config: ValueMap::new(),
            position: None,
            on_error: ErrorPolicy::default(),
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Position { x, y });
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.on_error = ErrorPolicy::Continue;
        self
    }
}

/// Directed link between two nodes.
///
/// Edges leaving a branching node may carry a [`Branch`] tag; the edge is only
/// followed when the node's boolean result matches the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
}

impl Edge {
    pub fn new(from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: Branch) -> Self {
        self.branch = Some(branch);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Branch {
    #[serde(rename = "on_true", alias = "true")]
    OnTrue,
    #[serde(rename = "on_false", alias = "false")]
    OnFalse,
}

impl Branch {
    pub fn from_result(result: bool) -> Self {
        if result {
            Branch::OnTrue
        } else {
            Branch::OnFalse
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::OnTrue => "on_true",
            Branch::OnFalse => "on_false",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Node position in visual editor
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// What happens to the run when this node fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Fail the whole execution.
    #[default]
    Fail,
    /// Record the failure and let downstream nodes run.
    Continue,
}

/// Per-workflow execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Upper bound on any single node's execution time.
    #[serde(default)]
    pub node_timeout_ms: Option<u64>,
    #[serde(default = "default_max_parallel_nodes")]
    pub max_parallel_nodes: usize,
}

fn default_max_parallel_nodes() -> usize {
    10
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            node_timeout_ms: None,
            max_parallel_nodes: default_max_parallel_nodes(),
        }
    }
}

/// Event class that started an execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Manual,
    Scheduled,
    Webhook,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Manual => "manual",
            TriggerType::Scheduled => "scheduled",
            TriggerType::Webhook => "webhook",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The request that starts an execution. `triggered_by` is the caller's
/// identity, passed explicitly with each request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerEvent {
    #[serde(default)]
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl TriggerEvent {
    pub fn manual(triggered_by: impl Into<String>) -> Self {
        Self {
            trigger_type: TriggerType::Manual,
            triggered_by: Some(triggered_by.into()),
            payload: None,
        }
    }

    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            triggered_by: None,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Value exposed to templates as the `trigger` global.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "type": self.trigger_type.as_str(),
            "triggered_by": self.triggered_by,
            "payload": self.payload.clone().unwrap_or(Value::Null),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_editor_definition() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "name": "check",
            "nodes": [
                {"id": "n1", "type": "http_request", "config": {"url": "http://x"}},
                {"id": "n2", "type": "conditional", "on_error": "continue"}
            ],
            "edges": [
                {"from": "n1", "to": "n2"},
                {"from": "n2", "to": "n1", "branch": "false"}
            ]
        }))
        .unwrap();

        assert_eq!(def.version, 1);
        assert_eq!(def.nodes[0].node_type, "http_request");
        assert_eq!(def.nodes[1].on_error, ErrorPolicy::Continue);
        assert_eq!(def.edges[0].branch, None);
        assert_eq!(def.edges[1].branch, Some(Branch::OnFalse));
        assert_eq!(def.settings.max_parallel_nodes, 10);
    }

    #[test]
    fn branch_serializes_with_tag_names() {
        let edge = Edge::new("a", "b").with_branch(Branch::OnTrue);
        let value = serde_json::to_value(&edge).unwrap();
        assert_eq!(value, json!({"from": "a", "to": "b", "branch": "on_true"}));
    }
}
