use crate::registry::NodeRegistry;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};
use wfcore::{
    Branch, NodeId, NodeSpec, WorkflowDefinition, WorkflowError, WorkflowId, WorkflowSettings,
};

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub spec: NodeSpec,
    /// Whether the node's executor picks a branch.
    pub branching: bool,
}

/// Validated, arena-indexed form of one workflow version.
///
/// Building one is the validation step: a `WorkflowGraph` only exists for
/// definitions without duplicate ids, dangling edges, unknown node types or
/// cycles.
#[derive(Debug)]
pub struct WorkflowGraph {
    workflow_id: WorkflowId,
    version: u32,
    settings: WorkflowSettings,
    graph: DiGraph<GraphNode, Option<Branch>>,
    index: HashMap<NodeId, NodeIndex>,
    topo_order: Vec<NodeIndex>,
}

impl WorkflowGraph {
    pub fn build(
        definition: &WorkflowDefinition,
        registry: &NodeRegistry,
    ) -> Result<Self, WorkflowError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for spec in &definition.nodes {
            if index.contains_key(&spec.id) {
                return Err(WorkflowError::DuplicateNodeId(spec.id.clone()));
            }
            let executor = registry.validate_node(spec)?;
            let idx = graph.add_node(GraphNode {
                spec: spec.clone(),
                branching: executor.is_branching(),
            });
            index.insert(spec.id.clone(), idx);
        }

        let mut seen_edges = HashSet::new();
        for edge in &definition.edges {
            let dangling = |missing: &str| WorkflowError::DanglingEdge {
                from: edge.from.clone(),
                to: edge.to.clone(),
                missing: missing.to_string(),
            };
            let from = *index.get(&edge.from).ok_or_else(|| dangling(&edge.from))?;
            let to = *index.get(&edge.to).ok_or_else(|| dangling(&edge.to))?;

            if let Some(branch) = edge.branch {
                let source: &GraphNode = &graph[from];
                if !source.branching {
                    return Err(WorkflowError::InvalidConnection(format!(
                        "edge {} -> {} carries branch '{}' but '{}' nodes do not branch",
                        edge.from, edge.to, branch, source.spec.node_type
                    )));
                }
            }
            if !seen_edges.insert((from, to, edge.branch)) {
                return Err(WorkflowError::InvalidConnection(format!(
                    "duplicate edge {} -> {}",
                    edge.from, edge.to
                )));
            }
            graph.add_edge(from, to, edge.branch);
        }

        let topo_order = toposort(&graph, None).map_err(|_| WorkflowError::CyclicDependency)?;

        Ok(Self {
            workflow_id: definition.id,
            version: definition.version,
            settings: definition.settings.clone(),
            graph,
            index,
            topo_order,
        })
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node(&self, idx: NodeIndex) -> &GraphNode {
        &self.graph[idx]
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    /// Nodes in a valid execution order.
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.topo_order.iter().map(|idx| &self.graph[*idx])
    }

    /// Nodes with no incoming edge.
    pub fn entry_nodes(&self) -> Vec<&NodeId> {
        self.topo_order
            .iter()
            .filter(|idx| self.incoming_count(**idx) == 0)
            .map(|idx| &self.graph[*idx].spec.id)
            .collect()
    }

    /// Outgoing edges as `(target, branch tag)`.
    pub fn successors(&self, idx: NodeIndex) -> Vec<(NodeIndex, Option<Branch>)> {
        let mut out: Vec<_> = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .map(|e| (e.target(), *e.weight()))
            .collect();
        out.sort_by_key(|(target, _)| *target);
        out
    }

    fn incoming_count(&self, idx: NodeIndex) -> usize {
        self.graph.edges_directed(idx, Direction::Incoming).count()
    }

    /// Fresh readiness state for a new run.
    pub fn readiness(&self) -> Readiness {
        let count = self.graph.node_count();
        let mut readiness = Readiness {
            state: vec![NodeState::Waiting; count],
            pending_in: vec![0; count],
            live_in: vec![0; count],
            live_out: vec![0; count],
            queue: VecDeque::new(),
        };
        for idx in &self.topo_order {
            let incoming = self.incoming_count(*idx);
            readiness.pending_in[idx.index()] = incoming;
            if incoming == 0 {
                readiness.state[idx.index()] = NodeState::Ready;
                readiness.queue.push_back(*idx);
            }
        }
        readiness
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Waiting,
    Ready,
    Running,
    Completed,
    /// Every incoming edge was excluded by a branch decision.
    Skipped,
    Failed,
    Cancelled,
}

/// Dependency-count readiness for one run.
///
/// Each node counts unresolved incoming edges and incoming edges that were
/// actually taken. A node becomes ready when all its incoming edges are
/// resolved and at least one was taken; if none was taken it is skipped and
/// its own outgoing edges resolve as not taken.
#[derive(Debug, Clone)]
pub struct Readiness {
    state: Vec<NodeState>,
    pending_in: Vec<usize>,
    live_in: Vec<usize>,
    live_out: Vec<usize>,
    queue: VecDeque<NodeIndex>,
}

impl Readiness {
    pub fn state(&self, idx: NodeIndex) -> NodeState {
        self.state[idx.index()]
    }

    pub fn ready_nodes(&self) -> Vec<NodeIndex> {
        self.queue.iter().copied().collect()
    }

    pub fn has_ready(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Take the next ready node and mark it running.
    pub fn start_next(&mut self) -> Option<NodeIndex> {
        let idx = self.queue.pop_front()?;
        self.state[idx.index()] = NodeState::Running;
        Some(idx)
    }

    /// Mark `idx` completed. Untagged outgoing edges are taken; tagged edges
    /// only when they match `taken`.
    pub fn complete(&mut self, graph: &WorkflowGraph, idx: NodeIndex, taken: Option<Branch>) {
        self.state[idx.index()] = NodeState::Completed;

        let mut skipped = Vec::new();
        for (target, branch) in graph.successors(idx) {
            let live = branch.is_none() || branch == taken;
            if live {
                self.live_out[idx.index()] += 1;
            }
            self.resolve_edge(target, live, &mut skipped);
        }

        while let Some(skipped_idx) = skipped.pop() {
            tracing::debug!(
                node_id = %graph.node(skipped_idx).spec.id,
                "node skipped, no incoming branch taken"
            );
            for (target, _) in graph.successors(skipped_idx) {
                self.resolve_edge(target, false, &mut skipped);
            }
        }
    }

    fn resolve_edge(&mut self, target: NodeIndex, live: bool, skipped: &mut Vec<NodeIndex>) {
        let t = target.index();
        self.pending_in[t] -= 1;
        if live {
            self.live_in[t] += 1;
        }
        if self.pending_in[t] == 0 && self.state[t] == NodeState::Waiting {
            if self.live_in[t] > 0 {
                self.state[t] = NodeState::Ready;
                self.queue.push_back(target);
            } else {
                self.state[t] = NodeState::Skipped;
                skipped.push(target);
            }
        }
    }

    pub fn fail(&mut self, idx: NodeIndex) {
        self.state[idx.index()] = NodeState::Failed;
    }

    pub fn cancel(&mut self, idx: NodeIndex) {
        self.state[idx.index()] = NodeState::Cancelled;
    }

    /// True once every node has either completed or been skipped.
    pub fn is_done(&self) -> bool {
        self.state
            .iter()
            .all(|s| matches!(s, NodeState::Completed | NodeState::Skipped))
    }

    pub fn count(&self, state: NodeState) -> usize {
        self.state.iter().filter(|s| **s == state).count()
    }

    /// Completed nodes none of whose outgoing edges were taken.
    pub fn result_nodes(&self) -> Vec<NodeIndex> {
        (0..self.state.len())
            .filter(|i| self.state[*i] == NodeState::Completed && self.live_out[*i] == 0)
            .map(NodeIndex::new)
            .collect()
    }
}
