use crate::context::ExecutionContext;
use crate::expression::resolve_config;
use crate::graph::{NodeState, Readiness, WorkflowGraph};
use crate::registry::NodeRegistry;
use crate::store::ExecutionRecord;
use futures::stream::{FuturesUnordered, StreamExt};
use petgraph::graph::NodeIndex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::{AbortHandle, JoinError};
use tokio::time::{timeout, Duration};
use wfcore::{
    Branch, ErrorPolicy, EventBus, Execution, ExecutionError, ExecutionLog, ExecutionStatus,
    IntegrationLookup, NodeContext, NodeError, NodeOutcome, TriggerEvent, Value, ValueMap,
};

/// Collaborators shared by every run.
#[derive(Clone)]
pub struct ExecutionEnv {
    pub registry: Arc<NodeRegistry>,
    pub events: Arc<EventBus>,
    pub integrations: Arc<dyn IntegrationLookup>,
}

/// Drives one execution of a validated graph to a terminal status.
pub struct WorkflowExecutor {
    max_parallel: usize,
    cancel_grace: Duration,
}

type NodeTaskResult = (NodeIndex, NodeOutcome, u64);

struct RunState {
    failure: Option<String>,
    cancelled: bool,
    cancel_deadline: Option<tokio::time::Instant>,
}

impl WorkflowExecutor {
    pub fn new(max_parallel: usize, cancel_grace: Duration) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            cancel_grace,
        }
    }

    /// Run `graph` for the execution held by `record`.
    ///
    /// Fails only if another run already claimed the record; every node-level
    /// problem ends up in the returned execution's status instead.
    pub async fn run(
        &self,
        graph: &WorkflowGraph,
        env: &ExecutionEnv,
        record: Arc<ExecutionRecord>,
        trigger: &TriggerEvent,
    ) -> Result<Execution, ExecutionError> {
        record.claim()?;
        let execution_id = record.id();
        let token = record.cancellation().clone();
        let mut ctx = ExecutionContext::new(record.clone(), env.events.clone());
        ctx.set_global("trigger", trigger.to_value());

        if token.is_cancelled() {
            tracing::info!(%execution_id, "Execution cancelled before start");
            return ctx.transition(ExecutionStatus::Cancelled).await;
        }

        ctx.transition(ExecutionStatus::Running).await?;
        tracing::info!(
            %execution_id,
            workflow_id = %graph.workflow_id(),
            nodes = graph.len(),
            "Starting workflow execution"
        );
        let started = Instant::now();

        let limit = self.max_parallel.min(graph.settings().max_parallel_nodes.max(1));
        let node_timeout = graph.settings().node_timeout_ms.map(Duration::from_millis);
        let mut readiness = graph.readiness();
        let mut running = FuturesUnordered::new();
        let mut aborts: HashMap<NodeIndex, AbortHandle> = HashMap::new();
        let mut state = RunState {
            failure: None,
            cancelled: false,
            cancel_deadline: None,
        };

        loop {
            while state.failure.is_none() && !state.cancelled && running.len() < limit {
                let Some(idx) = readiness.start_next() else {
                    break;
                };
                let node = &graph.node(idx).spec;
                let started_msg = format!("Node {} started", node.id);
                ctx.append_log(
                    ExecutionLog::info(execution_id, node.id.clone(), started_msg)
                        .with_metadata(json!({ "node_type": node.node_type })),
                )
                .await;

                let config = match resolve_config(&node.config, &ctx) {
                    Ok(config) => config,
                    Err(e) => {
                        let outcome = NodeOutcome::Failed(NodeError::from(e).to_string());
                        self.fold(graph, &mut ctx, &mut readiness, &mut state, idx, outcome, 0)
                            .await;
                        continue;
                    }
                };
                let Some(executor) = env.registry.get(&node.node_type) else {
                    let outcome =
                        NodeOutcome::Failed(format!("Unsupported node type: {}", node.node_type));
                    self.fold(graph, &mut ctx, &mut readiness, &mut state, idx, outcome, 0)
                        .await;
                    continue;
                };

                tracing::debug!(
                    %execution_id,
                    node_id = %node.id,
                    node_type = %node.node_type,
                    "Spawning node"
                );
                let node_ctx = NodeContext {
                    execution_id,
                    node_id: node.id.clone(),
                    config,
                    events: env.events.create_emitter(execution_id, node.id.clone()),
                    cancellation: token.child_token(),
                    integrations: env.integrations.clone(),
                };
                let task = async move {
                    let start = Instant::now();
                    let result = match node_timeout {
                        Some(limit) => match timeout(limit, executor.execute(node_ctx)).await {
                            Ok(result) => result,
                            Err(_) => Err(NodeError::Timeout {
                                seconds: limit.as_secs_f64(),
                            }),
                        },
                        None => executor.execute(node_ctx).await,
                    };
                    (idx, NodeOutcome::from(result), start.elapsed().as_millis() as u64)
                };
                let handle = tokio::spawn(task);
                aborts.insert(idx, handle.abort_handle());
                running.push(async move { (idx, handle.await) });
            }

            if running.is_empty() {
                break;
            }

            let deadline = state.cancel_deadline;
            tokio::select! {
                biased;
                _ = token.cancelled(), if !state.cancelled => {
                    tracing::info!(
                        %execution_id,
                        running = running.len(),
                        "Cancellation requested"
                    );
                    state.cancelled = true;
                    state.cancel_deadline = Some(tokio::time::Instant::now() + self.cancel_grace);
                }
                _ = sleep_until_opt(deadline) => {
                    tracing::warn!(
                        %execution_id,
                        running = running.len(),
                        "Grace period elapsed, aborting nodes"
                    );
                    for (idx, abort) in aborts.drain() {
                        abort.abort();
                        readiness.cancel(idx);
                        let node_id = graph.node(idx).spec.id.clone();
                        let message = format!("Node {} aborted", node_id);
                        ctx.append_log(ExecutionLog::warning(execution_id, node_id, message))
                            .await;
                    }
                    break;
                }
                Some((idx, joined)) = running.next() => {
                    aborts.remove(&idx);
                    let (idx, outcome, duration_ms) = flatten_join(idx, joined);
                    self.fold(
                        graph,
                        &mut ctx,
                        &mut readiness,
                        &mut state,
                        idx,
                        outcome,
                        duration_ms,
                    )
                    .await;
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let execution = if let Some(message) = state.failure {
            tracing::error!(%execution_id, duration_ms, "Workflow execution failed: {}", message);
            ctx.finish_with(ExecutionStatus::Failed, |e| e.error_message = Some(message))
                .await?
        } else if state.cancelled {
            tracing::info!(%execution_id, duration_ms, "Workflow execution cancelled");
            ctx.transition(ExecutionStatus::Cancelled).await?
        } else if readiness.is_done() {
            let result = result_data(graph, &ctx, &readiness);
            tracing::info!(
                %execution_id,
                duration_ms,
                completed = readiness.count(NodeState::Completed),
                skipped = readiness.count(NodeState::Skipped),
                "Workflow execution completed"
            );
            ctx.finish_with(ExecutionStatus::Success, |e| e.result_data = Some(result))
                .await?
        } else {
            let settled =
                readiness.count(NodeState::Completed) + readiness.count(NodeState::Skipped);
            let message = format!(
                "Execution stalled with {} node(s) neither completed nor skipped",
                graph.len() - settled
            );
            tracing::error!(%execution_id, "{}", message);
            ctx.finish_with(ExecutionStatus::Failed, |e| e.error_message = Some(message))
                .await?
        };

        Ok(execution)
    }

    /// Fold one node outcome into the context and readiness state.
    #[allow(clippy::too_many_arguments)]
    async fn fold(
        &self,
        graph: &WorkflowGraph,
        ctx: &mut ExecutionContext,
        readiness: &mut Readiness,
        state: &mut RunState,
        idx: NodeIndex,
        outcome: NodeOutcome,
        duration_ms: u64,
    ) {
        let execution_id = ctx.execution_id();
        let node = graph.node(idx);
        let node_id = node.spec.id.clone();

        let outcome = match outcome {
            NodeOutcome::Completed(output) if node.branching => match branch_result(&output) {
                Some(_) => NodeOutcome::Completed(output),
                None => NodeOutcome::Failed(format!(
                    "branching node produced no boolean 'result' (got {})",
                    output
                )),
            },
            other => other,
        };

        match outcome {
            NodeOutcome::Completed(output) => {
                tracing::info!(%execution_id, %node_id, duration_ms, "Node completed");
                let completed_msg = format!("Node {} completed", node_id);
                ctx.append_log(
                    ExecutionLog::info(execution_id, node_id.clone(), completed_msg)
                        .with_metadata(json!({ "output": output, "duration_ms": duration_ms })),
                )
                .await;

                let taken = if node.branching {
                    branch_result(&output).map(Branch::from_result)
                } else {
                    None
                };
                ctx.record_output(node_id.clone(), output);
                readiness.complete(graph, idx, taken);

                if let Some(branch) = taken {
                    let followed: Vec<&str> = graph
                        .successors(idx)
                        .into_iter()
                        .filter(|(_, b)| *b == Some(branch))
                        .map(|(target, _)| graph.node(target).spec.id.as_str())
                        .collect();
                    let result = branch == Branch::OnTrue;
                    let message = if followed.is_empty() {
                        format!(
                            "Condition evaluated to {}; no {} branch, path ends",
                            result, branch
                        )
                    } else {
                        format!("Condition evaluated to {}; following {} branch", result, branch)
                    };
                    let metadata = json!({
                        "result": result,
                        "branch": branch.as_str(),
                        "followed": followed,
                    });
                    ctx.append_log(
                        ExecutionLog::info(execution_id, node_id.clone(), message)
                            .with_metadata(metadata),
                    )
                    .await;
                }
            }
            NodeOutcome::Failed(message) => {
                tracing::error!(%execution_id, %node_id, "Node failed: {}", message);
                let failed_msg = format!("Node {} failed: {}", node_id, message);
                ctx.append_log(
                    ExecutionLog::error(execution_id, node_id.clone(), failed_msg)
                        .with_metadata(json!({ "error": message, "duration_ms": duration_ms })),
                )
                .await;

                if node.spec.on_error == ErrorPolicy::Continue {
                    ctx.append_log(ExecutionLog::warning(
                        execution_id,
                        node_id.clone(),
                        format!("Continuing after failure of node {}", node_id),
                    ))
                    .await;
                    ctx.record_output(node_id, json!({ "error": message }));
                    readiness.complete(graph, idx, None);
                } else {
                    readiness.fail(idx);
                    if state.failure.is_none() {
                        state.failure = Some(format!("Node {} failed: {}", node_id, message));
                    }
                }
            }
            NodeOutcome::Cancelled => {
                tracing::info!(%execution_id, %node_id, "Node cancelled");
                ctx.append_log(ExecutionLog::warning(
                    execution_id,
                    node_id.clone(),
                    format!("Node {} cancelled", node_id),
                ))
                .await;
                readiness.cancel(idx);
                state.cancelled = true;
                if state.cancel_deadline.is_none() {
                    state.cancel_deadline = Some(tokio::time::Instant::now() + self.cancel_grace);
                }
            }
        }
    }
}

fn branch_result(output: &Value) -> Option<bool> {
    output.get("result").and_then(Value::as_bool)
}

fn flatten_join(idx: NodeIndex, joined: Result<NodeTaskResult, JoinError>) -> NodeTaskResult {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => (idx, NodeOutcome::Cancelled, 0),
        Err(e) => (idx, NodeOutcome::Failed(format!("node task panicked: {}", e)), 0),
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Outputs of completed nodes that did not hand over to any successor.
fn result_data(graph: &WorkflowGraph, ctx: &ExecutionContext, readiness: &Readiness) -> Value {
    let mut result = ValueMap::new();
    for idx in readiness.result_nodes() {
        let id = &graph.node(idx).spec.id;
        if let Some(output) = ctx.get_output(id) {
            result.insert(id.clone(), output.clone());
        }
    }
    Value::Object(result)
}
