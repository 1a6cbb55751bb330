use crate::executor::{ExecutionEnv, WorkflowExecutor};
use crate::graph::WorkflowGraph;
use crate::registry::NodeRegistry;
use crate::store::{
    ExecutionRecord, ExecutionStore, InMemoryWorkflowStore, WorkflowStore,
    DEFAULT_RETAINED_EXECUTIONS,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use wfcore::{
    EventBus, Execution, ExecutionError, ExecutionEvent, ExecutionId, ExecutionLog, FlowError,
    IntegrationLookup, NoIntegrations, TriggerEvent, WorkflowDefinition, WorkflowError, WorkflowId,
};

/// Main entry point: validates workflows, starts executions and answers the
/// polling interface (`get_execution`, `get_execution_logs`).
pub struct FlowRuntime {
    env: ExecutionEnv,
    executor: Arc<WorkflowExecutor>,
    workflows: Arc<dyn WorkflowStore>,
    graphs: RwLock<HashMap<WorkflowId, Arc<WorkflowGraph>>>,
    executions: ExecutionStore,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(NodeRegistry::new()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let executor = Arc::new(WorkflowExecutor::new(
            config.max_parallel_nodes,
            config.cancel_grace_period,
        ));
        let events = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            env: ExecutionEnv {
                registry,
                events,
                integrations: Arc::new(NoIntegrations),
            },
            executor,
            workflows: Arc::new(InMemoryWorkflowStore::new()),
            graphs: RwLock::new(HashMap::new()),
            executions: ExecutionStore::with_retention(config.max_retained_executions),
        }
    }

    /// Use an external workflow store instead of the in-memory one.
    pub fn with_workflow_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.workflows = store;
        self
    }

    /// Make integration records available to node executors.
    pub fn with_integrations(mut self, integrations: Arc<dyn IntegrationLookup>) -> Self {
        self.env.integrations = integrations;
        self
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.env.registry
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.env.events.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.env.events
    }

    /// Validate a definition against the registered node types.
    pub fn validate(&self, workflow: &WorkflowDefinition) -> Result<WorkflowGraph, WorkflowError> {
        WorkflowGraph::build(workflow, &self.env.registry)
    }

    /// Validate and store a workflow. Invalid workflows are rejected.
    pub async fn register_workflow(&self, workflow: WorkflowDefinition) -> Result<(), FlowError> {
        let graph = Arc::new(self.validate(&workflow)?);
        tracing::info!(
            workflow_id = %workflow.id,
            version = workflow.version,
            "Registered workflow '{}'",
            workflow.name
        );
        self.graphs.write().await.insert(workflow.id, graph);
        self.workflows.save_workflow(workflow).await;
        Ok(())
    }

    pub async fn get_workflow(&self, id: WorkflowId) -> Option<WorkflowDefinition> {
        self.workflows.get_workflow(id).await
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        self.workflows.list_workflows().await
    }

    pub async fn remove_workflow(&self, id: WorkflowId) -> Option<WorkflowDefinition> {
        self.graphs.write().await.remove(&id);
        self.workflows.delete_workflow(id).await
    }

    /// Validated graph for the current version, validating at most once per version.
    async fn graph_for(&self, workflow_id: WorkflowId) -> Result<Arc<WorkflowGraph>, FlowError> {
        let workflow = self
            .workflows
            .get_workflow(workflow_id)
            .await
            .ok_or_else(|| WorkflowError::NotFound(workflow_id.to_string()))?;

        if let Some(graph) = self.graphs.read().await.get(&workflow_id) {
            if graph.version() == workflow.version {
                return Ok(graph.clone());
            }
        }

        let graph = Arc::new(self.validate(&workflow)?);
        self.graphs.write().await.insert(workflow_id, graph.clone());
        Ok(graph)
    }

    /// Create a pending execution and start it in the background.
    pub async fn create_execution(
        &self,
        workflow_id: WorkflowId,
        trigger: TriggerEvent,
    ) -> Result<Execution, FlowError> {
        let graph = self.graph_for(workflow_id).await?;
        let record = self
            .executions
            .insert(Execution::new(workflow_id, trigger.trigger_type, trigger.triggered_by.clone()))
            .await;
        let execution = record.snapshot().await;
        tracing::info!(
            execution_id = %execution.id,
            %workflow_id,
            trigger = %trigger.trigger_type,
            "Created execution"
        );

        let executor = self.executor.clone();
        let env = self.env.clone();
        tokio::spawn(async move {
            if let Err(e) = executor.run(&graph, &env, record, &trigger).await {
                tracing::error!("Execution could not start: {}", e);
            }
        });

        Ok(execution)
    }

    /// Validate and run a workflow to completion without registering it.
    pub async fn execute(
        &self,
        workflow: &WorkflowDefinition,
        trigger: TriggerEvent,
    ) -> Result<Execution, FlowError> {
        let graph = self.validate(workflow)?;
        let record = self
            .executions
            .insert(Execution::new(workflow.id, trigger.trigger_type, trigger.triggered_by.clone()))
            .await;
        Ok(self.executor.run(&graph, &self.env, record, &trigger).await?)
    }

    pub async fn get_execution(&self, id: ExecutionId) -> Result<Execution, ExecutionError> {
        Ok(self.executions.get(id).await?.snapshot().await)
    }

    pub async fn get_execution_logs(
        &self,
        id: ExecutionId,
    ) -> Result<Vec<ExecutionLog>, ExecutionError> {
        Ok(self.executions.get(id).await?.logs().await)
    }

    /// Executions of a workflow, newest first.
    pub async fn list_executions(
        &self,
        workflow_id: WorkflowId,
        skip: usize,
        limit: usize,
    ) -> Vec<Execution> {
        self.executions.list_for_workflow(workflow_id, skip, limit).await
    }

    /// Request cancellation. The engine performs the actual transition.
    pub async fn cancel_execution(&self, id: ExecutionId) -> Result<Execution, ExecutionError> {
        let record = self.executions.get(id).await?;
        let execution = record.snapshot().await;
        if execution.is_finished() {
            return Err(ExecutionError::AlreadyTerminal {
                id,
                status: execution.status,
            });
        }
        tracing::info!(execution_id = %id, "Cancellation requested");
        record.request_cancel();
        Ok(execution)
    }

    /// Wait until the execution reaches a terminal status.
    pub async fn wait_for_completion(&self, id: ExecutionId) -> Result<Execution, ExecutionError> {
        let record: Arc<ExecutionRecord> = self.executions.get(id).await?;
        Ok(record.wait_until_finished().await)
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound on concurrently running nodes within one execution.
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    /// How long running nodes get to observe a cancellation before they are aborted.
    pub cancel_grace_period: Duration,
    /// Finished executions beyond this count are dropped, oldest first.
    pub max_retained_executions: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 10,
            event_buffer_size: 1000,
            cancel_grace_period: Duration::from_secs(5),
            max_retained_executions: DEFAULT_RETAINED_EXECUTIONS,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `FLOW_MAX_PARALLEL_NODES`, `FLOW_EVENT_BUFFER_SIZE`,
    /// `FLOW_CANCEL_GRACE_MS` and `FLOW_MAX_RETAINED_EXECUTIONS`. Unparseable
    /// values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let parse = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(n) = parse("FLOW_MAX_PARALLEL_NODES") {
            config.max_parallel_nodes = (n as usize).max(1);
        }
        if let Some(n) = parse("FLOW_EVENT_BUFFER_SIZE") {
            config.event_buffer_size = (n as usize).max(1);
        }
        if let Some(ms) = parse("FLOW_CANCEL_GRACE_MS") {
            config.cancel_grace_period = Duration::from_millis(ms);
        }
        if let Some(n) = parse("FLOW_MAX_RETAINED_EXECUTIONS") {
            config.max_retained_executions = (n as usize).max(1);
        }
        config
    }
}
