#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing_subscriber::EnvFilter;
use wfcore::{
    ExecutionLog, NodeContext, NodeError, NodeExecutor, NodeSpec, Value, ValueMap,
    WorkflowDefinition,
};
use wfruntime::{FlowRuntime, NodeRegistry, RuntimeConfig};

/// Returns its resolved config as output.
pub struct Echo;

#[async_trait]
impl NodeExecutor for Echo {
    fn node_type(&self) -> &str {
        "echo"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Object(ctx.config))
    }
}

/// Always fails with `message` (default "boom").
pub struct Fail;

#[async_trait]
impl NodeExecutor for Fail {
    fn node_type(&self) -> &str {
        "fail"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let message = ctx.config.get("message").and_then(Value::as_str).unwrap_or("boom");
        Err(NodeError::ExecutionFailed(message.to_string()))
    }
}

/// Branching node that reports `value` as its result.
pub struct Check;

#[async_trait]
impl NodeExecutor for Check {
    fn node_type(&self) -> &str {
        "check"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(json!({ "result": ctx.get_config_or("value", Value::Null) }))
    }

    fn is_branching(&self) -> bool {
        true
    }
}

/// Tracks how many sleep nodes run at the same time.
#[derive(Default)]
pub struct Probe {
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl Probe {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Sleeps for `ms` milliseconds, stopping early on cancellation.
pub struct Sleep(pub Arc<Probe>);

#[async_trait]
impl NodeExecutor for Sleep {
    fn node_type(&self) -> &str {
        "sleep"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let ms = ctx.get_f64("ms")?.unwrap_or(10.0) as u64;
        let now = self.0.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak.fetch_max(now, Ordering::SeqCst);

        let result = tokio::select! {
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
            _ = sleep(Duration::from_millis(ms)) => Ok(json!({ "slept": ms })),
        };

        self.0.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Sleeps for `ms` milliseconds and ignores cancellation.
pub struct Stubborn;

#[async_trait]
impl NodeExecutor for Stubborn {
    fn node_type(&self) -> &str {
        "stubborn"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let ms = ctx.get_f64("ms")?.unwrap_or(10_000.0) as u64;
        sleep(Duration::from_millis(ms)).await;
        Ok(Value::Null)
    }
}

/// Rejects a negative `limit` at validation time.
pub struct Strict;

#[async_trait]
impl NodeExecutor for Strict {
    fn node_type(&self) -> &str {
        "strict"
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Null)
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), NodeError> {
        match config.get("limit").and_then(Value::as_i64) {
            Some(limit) if limit >= 0 => Ok(()),
            _ => Err(NodeError::invalid("limit", "non-negative integer", "missing or negative")),
        }
    }
}

pub fn registry(probe: Arc<Probe>) -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(Echo));
    registry.register(Arc::new(Fail));
    registry.register(Arc::new(Check));
    registry.register(Arc::new(Sleep(probe)));
    registry.register(Arc::new(Stubborn));
    registry.register(Arc::new(Strict));
    registry
}

pub fn runtime() -> (FlowRuntime, Arc<Probe>) {
    runtime_with(RuntimeConfig::default())
}

/// Route engine tracing to the test output; `RUST_LOG` selects the level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn runtime_with(config: RuntimeConfig) -> (FlowRuntime, Arc<Probe>) {
    init_tracing();
    let probe = Arc::new(Probe::default());
    let runtime = FlowRuntime::with_registry(Arc::new(registry(probe.clone())), config);
    (runtime, probe)
}

pub fn node(id: &str, node_type: &str, config: Value) -> NodeSpec {
    let Value::Object(map) = config else {
        panic!("config must be an object");
    };
    let mut spec = NodeSpec::new(id, node_type);
    spec.config = map;
    spec
}

pub fn workflow(nodes: Vec<NodeSpec>, edges: &[(&str, &str)]) -> WorkflowDefinition {
    let mut workflow = WorkflowDefinition::new("test");
    for spec in nodes {
        workflow.add_node(spec);
    }
    for (from, to) in edges {
        workflow.connect(*from, *to);
    }
    workflow
}

pub fn messages(logs: &[ExecutionLog]) -> Vec<String> {
    logs.iter().map(|l| l.message.clone()).collect()
}

pub fn has_message(logs: &[ExecutionLog], message: &str) -> bool {
    logs.iter().any(|l| l.message == message)
}
