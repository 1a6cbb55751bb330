use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use wfcore::{
    Execution, ExecutionError, ExecutionId, ExecutionLog, ExecutionStatus, WorkflowDefinition,
    WorkflowId,
};

/// Source of workflow definitions. Durable persistence lives behind this trait.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn get_workflow(&self, id: WorkflowId) -> Option<WorkflowDefinition>;

    async fn save_workflow(&self, workflow: WorkflowDefinition);

    async fn delete_workflow(&self, id: WorkflowId) -> Option<WorkflowDefinition>;

    async fn list_workflows(&self) -> Vec<WorkflowDefinition>;
}

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<WorkflowId, WorkflowDefinition>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn get_workflow(&self, id: WorkflowId) -> Option<WorkflowDefinition> {
        self.workflows.read().await.get(&id).cloned()
    }

    async fn save_workflow(&self, workflow: WorkflowDefinition) {
        self.workflows.write().await.insert(workflow.id, workflow);
    }

    async fn delete_workflow(&self, id: WorkflowId) -> Option<WorkflowDefinition> {
        self.workflows.write().await.remove(&id)
    }

    async fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        let mut workflows: Vec<_> = self.workflows.read().await.values().cloned().collect();
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        workflows
    }
}

/// Shared view of one execution.
///
/// Observers read snapshots; the engine run that claimed the record is the
/// only writer. The cancellation token is the one externally reachable
/// mutation path.
pub struct ExecutionRecord {
    id: ExecutionId,
    execution: RwLock<Execution>,
    logs: RwLock<Vec<ExecutionLog>>,
    status_tx: watch::Sender<ExecutionStatus>,
    cancellation: CancellationToken,
    claimed: AtomicBool,
}

impl ExecutionRecord {
    pub fn new(execution: Execution) -> Self {
        let (status_tx, _) = watch::channel(execution.status);
        Self {
            id: execution.id,
            execution: RwLock::new(execution),
            logs: RwLock::new(Vec::new()),
            status_tx,
            cancellation: CancellationToken::new(),
            claimed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ExecutionId {
        self.id
    }

    pub async fn snapshot(&self) -> Execution {
        self.execution.read().await.clone()
    }

    pub async fn logs(&self) -> Vec<ExecutionLog> {
        self.logs.read().await.clone()
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.status_tx.borrow()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn request_cancel(&self) {
        self.cancellation.cancel();
    }

    /// Resolves once the execution reaches a terminal status.
    pub async fn wait_until_finished(&self) -> Execution {
        let mut rx = self.status_tx.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|status| status.is_terminal()).await;
        self.snapshot().await
    }

    /// Claim the right to drive this execution. Only the first caller wins.
    pub(crate) fn claim(&self) -> Result<(), ExecutionError> {
        if self.claimed.swap(true, Ordering::AcqRel) {
            return Err(ExecutionError::AlreadyRunning(self.id));
        }
        Ok(())
    }

    pub(crate) async fn update<R>(&self, f: impl FnOnce(&mut Execution) -> R) -> R {
        let mut execution = self.execution.write().await;
        let result = f(&mut execution);
        self.status_tx.send_replace(execution.status);
        result
    }

    /// Append keeping timestamps non-decreasing.
    pub(crate) async fn push_log(&self, mut entry: ExecutionLog) -> ExecutionLog {
        let mut logs = self.logs.write().await;
        if let Some(last) = logs.last() {
            if entry.timestamp < last.timestamp {
                entry.timestamp = last.timestamp;
            }
        }
        logs.push(entry.clone());
        entry
    }
}

/// Executions kept in memory when no retention limit is given.
pub const DEFAULT_RETAINED_EXECUTIONS: usize = 1000;

#[derive(Default)]
struct Records {
    by_id: HashMap<ExecutionId, Arc<ExecutionRecord>>,
    // insertion order, oldest first
    order: VecDeque<ExecutionId>,
}

/// Index of all executions known to this process.
///
/// Holds at most `retain` records. Inserting beyond that evicts the oldest
/// finished executions; pending and running ones are never evicted.
pub struct ExecutionStore {
    records: RwLock<Records>,
    retain: usize,
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETAINED_EXECUTIONS)
    }
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retain: usize) -> Self {
        Self {
            records: RwLock::new(Records::default()),
            retain: retain.max(1),
        }
    }

    pub async fn insert(&self, execution: Execution) -> Arc<ExecutionRecord> {
        let id = execution.id;
        let record = Arc::new(ExecutionRecord::new(execution));
        let mut records = self.records.write().await;
        records.by_id.insert(id, record.clone());
        records.order.push_back(id);
        Self::evict(&mut records, self.retain);
        record
    }

    fn evict(records: &mut Records, retain: usize) {
        let mut excess = records.by_id.len().saturating_sub(retain);
        if excess == 0 {
            return;
        }
        let Records { by_id, order } = records;
        order.retain(|id| {
            if excess == 0 {
                return true;
            }
            match by_id.get(id) {
                Some(record) if record.status().is_terminal() => {
                    by_id.remove(id);
                    excess -= 1;
                    tracing::debug!(execution_id = %id, "Evicted finished execution");
                    false
                }
                Some(_) => true,
                None => false,
            }
        });
    }

    pub async fn get(&self, id: ExecutionId) -> Result<Arc<ExecutionRecord>, ExecutionError> {
        self.records
            .read()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or(ExecutionError::NotFound(id))
    }

    /// Executions of one workflow, newest first.
    pub async fn list_for_workflow(
        &self,
        workflow_id: WorkflowId,
        skip: usize,
        limit: usize,
    ) -> Vec<Execution> {
        let records: Vec<_> = self.records.read().await.by_id.values().cloned().collect();
        let mut executions = Vec::new();
        for record in records {
            let execution = record.snapshot().await;
            if execution.workflow_id == workflow_id {
                executions.push(execution);
            }
        }
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        executions.into_iter().skip(skip).take(limit).collect()
    }
}
