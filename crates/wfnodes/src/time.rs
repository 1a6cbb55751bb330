use async_trait::async_trait;
use tokio::time::sleep;
use wfcore::{
    ConfigField, NodeContext, NodeError, NodeExecutor, NodeMetadata, Value, ValueExt, ValueMap,
};

/// Suspend the node's continuation for `delay_seconds`.
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    fn node_type(&self) -> &str {
        "delay"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        let seconds = ctx
            .get_f64("delay_seconds")?
            .ok_or_else(|| NodeError::MissingConfig("delay_seconds".to_string()))?;
        if seconds < 0.0 {
            return Err(NodeError::invalid(
                "delay_seconds",
                "non-negative number",
                seconds.to_string(),
            ));
        }
        let delay = crate::seconds("delay_seconds", seconds)?;

        ctx.events.info(format!("Delaying for {}s", seconds));

        tokio::select! {
            _ = ctx.cancellation.cancelled() => {
                tracing::debug!(node_id = %ctx.node_id, "Delay interrupted");
                Err(NodeError::Cancelled)
            }
            _ = sleep(delay) => Ok(Value::Null),
        }
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), NodeError> {
        match config.get("delay_seconds") {
            None | Some(Value::Null) => Err(NodeError::MissingConfig("delay_seconds".to_string())),
            Some(Value::String(s)) if s.contains("{{") => Ok(()),
            Some(value) => match value.to_f64_lossy() {
                Some(n) if n >= 0.0 => crate::seconds("delay_seconds", n).map(|_| ()),
                Some(n) => Err(NodeError::invalid(
                    "delay_seconds",
                    "non-negative number",
                    n.to_string(),
                )),
                None => Err(NodeError::invalid("delay_seconds", "number", value.type_name())),
            },
        }
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for the given number of seconds".to_string(),
            category: "time".to_string(),
            config: vec![ConfigField::required("delay_seconds", "Seconds to wait (>= 0)")],
        }
    }
}
