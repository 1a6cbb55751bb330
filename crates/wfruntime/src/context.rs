use crate::expression::OutputSource;
use crate::store::ExecutionRecord;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use wfcore::{
    EventBus, Execution, ExecutionError, ExecutionEvent, ExecutionId, ExecutionLog, ExecutionStatus,
    NodeId, Value,
};

/// Per-run mutable state: node outputs, globals and the log.
///
/// Owned by exactly one engine run. Outputs are local so the resolver can read
/// them synchronously; log entries and status changes are written through to
/// the shared [`ExecutionRecord`] that pollers read.
pub struct ExecutionContext {
    record: Arc<ExecutionRecord>,
    events: Arc<EventBus>,
    outputs: HashMap<NodeId, Value>,
    globals: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(record: Arc<ExecutionRecord>, events: Arc<EventBus>) -> Self {
        Self {
            record,
            events,
            outputs: HashMap::new(),
            globals: HashMap::new(),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.record.id()
    }

    pub fn record_output(&mut self, node_id: impl Into<NodeId>, output: Value) {
        self.outputs.insert(node_id.into(), output);
    }

    pub fn get_output(&self, node_id: &str) -> Option<&Value> {
        self.outputs.get(node_id)
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn get_global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub async fn append_log(&self, entry: ExecutionLog) {
        let entry = self.record.push_log(entry).await;
        self.events.emit(ExecutionEvent::Log { entry });
    }

    pub async fn snapshot_logs(&self) -> Vec<ExecutionLog> {
        self.record.logs().await
    }

    pub async fn transition(&self, status: ExecutionStatus) -> Result<Execution, ExecutionError> {
        self.finish_with(status, |_| {}).await
    }

    /// Apply a status change together with the fields that accompany it.
    pub async fn finish_with(
        &self,
        status: ExecutionStatus,
        fill: impl FnOnce(&mut Execution),
    ) -> Result<Execution, ExecutionError> {
        let execution = self
            .record
            .update(|execution| {
                execution.transition(status)?;
                fill(execution);
                Ok::<_, ExecutionError>(execution.clone())
            })
            .await?;

        self.events.emit(ExecutionEvent::StatusChanged {
            execution_id: execution.id,
            workflow_id: execution.workflow_id,
            status,
            timestamp: Utc::now(),
        });
        Ok(execution)
    }
}

impl OutputSource for ExecutionContext {
    fn node_output(&self, node_id: &str) -> Option<&Value> {
        self.get_output(node_id)
    }

    fn global(&self, name: &str) -> Option<&Value> {
        self.get_global(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::resolve_str;
    use serde_json::json;
    use uuid::Uuid;
    use wfcore::TriggerType;

    fn context() -> ExecutionContext {
        let execution = Execution::new(Uuid::new_v4(), TriggerType::Manual, None);
        let record = Arc::new(ExecutionRecord::new(execution));
        ExecutionContext::new(record, Arc::new(EventBus::new(16)))
    }

    #[tokio::test]
    async fn logs_are_ordered_and_timestamps_monotonic() {
        let ctx = context();
        let id = ctx.execution_id();
        let mut late = ExecutionLog::info(id, "a", "first");
        late.timestamp = Utc::now() + chrono::Duration::seconds(5);
        ctx.append_log(late.clone()).await;
        ctx.append_log(ExecutionLog::info(id, "b", "second")).await;

        let logs = ctx.snapshot_logs().await;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].message, "first");
        assert_eq!(logs[1].message, "second");
        assert!(logs[1].timestamp >= logs[0].timestamp);
    }

    #[tokio::test]
    async fn outputs_shadow_globals() {
        let mut ctx = context();
        ctx.set_global("trigger", json!({"payload": {"id": 1}}));
        ctx.record_output("n1", json!({"status": 200}));

        assert_eq!(resolve_str("{{trigger.payload.id}}", &ctx).unwrap(), json!(1));
        assert_eq!(resolve_str("{{n1.output.status}}", &ctx).unwrap(), json!(200));

        ctx.record_output("trigger", json!({"payload": {"id": 2}}));
        assert_eq!(resolve_str("{{trigger.payload.id}}", &ctx).unwrap(), json!(2));
    }

    #[tokio::test]
    async fn transitions_are_checked() {
        let ctx = context();
        assert!(ctx.transition(ExecutionStatus::Success).await.is_err());
        ctx.transition(ExecutionStatus::Running).await.unwrap();
        let execution = ctx
            .finish_with(ExecutionStatus::Failed, |e| e.error_message = Some("boom".into()))
            .await
            .unwrap();
        assert_eq!(execution.error_message.as_deref(), Some("boom"));
        assert!(execution.completed_at.is_some());
    }
}
