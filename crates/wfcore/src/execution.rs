use crate::workflow::{NodeId, TriggerType, WorkflowId};
use crate::{ExecutionError, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Lifecycle of an execution: `pending -> running -> {success, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }

    /// A pending run may be cancelled before it starts; every other terminal
    /// state is only reachable from `running`.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Success)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub trigger_type: TriggerType,
    pub triggered_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub result_data: Option<Value>,
}

impl Execution {
    pub fn new(
        workflow_id: WorkflowId,
        trigger_type: TriggerType,
        triggered_by: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            trigger_type,
            triggered_by,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            result_data: None,
        }
    }

    /// Move to `next`, stamping `started_at` / `completed_at` on the way.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), ExecutionError> {
        if !self.status.can_transition_to(next) {
            return Err(ExecutionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        if next == ExecutionStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// Append-only timeline entry for one node of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub execution_id: ExecutionId,
    pub node_id: NodeId,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionLog {
    pub fn new(
        execution_id: ExecutionId,
        node_id: impl Into<NodeId>,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            node_id: node_id.into(),
            level,
            message: message.into(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn info(
        execution_id: ExecutionId,
        node_id: impl Into<NodeId>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(execution_id, node_id, LogLevel::Info, message)
    }

    pub fn warning(
        execution_id: ExecutionId,
        node_id: impl Into<NodeId>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(execution_id, node_id, LogLevel::Warning, message)
    }

    pub fn error(
        execution_id: ExecutionId,
        node_id: impl Into<NodeId>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(execution_id, node_id, LogLevel::Error, message)
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Metadata field by key, `None` when the entry carries no metadata.
    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }
}
