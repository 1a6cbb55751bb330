use async_trait::async_trait;
use serde_json::json;
use std::cmp::Ordering;
use std::fmt;
use wfcore::{
    ConfigField, NodeContext, NodeError, NodeExecutor, NodeMetadata, Value, ValueExt, ValueMap,
};

/// Comparison operators understood by the conditional node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Contains,
    In,
}

impl Operator {
    pub fn parse(op: &str) -> Option<Self> {
        match op.trim() {
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            "<" => Some(Self::Lt),
            ">=" => Some(Self::Ge),
            "<=" => Some(Self::Le),
            "contains" => Some(Self::Contains),
            "in" => Some(Self::In),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Contains => "contains",
            Self::In => "in",
        }
    }

    /// Apply the operator. Numeric when both sides are numeric (numeric
    /// strings included), otherwise on canonical string forms.
    pub fn apply(&self, left: &Value, right: &Value) -> Result<bool, NodeError> {
        match self {
            Self::Eq => Ok(loosely_equal(left, right)),
            Self::Ne => Ok(!loosely_equal(left, right)),
            Self::Gt => Ok(order(left, right) == Ordering::Greater),
            Self::Lt => Ok(order(left, right) == Ordering::Less),
            Self::Ge => Ok(order(left, right) != Ordering::Less),
            Self::Le => Ok(order(left, right) != Ordering::Greater),
            Self::Contains => membership(left, right, "left_value"),
            Self::In => membership(right, left, "right_value"),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left.to_f64_lossy(), right.to_f64_lossy()) {
        (Some(l), Some(r)) => l == r,
        _ => left.to_canonical_string() == right.to_canonical_string(),
    }
}

fn order(left: &Value, right: &Value) -> Ordering {
    match (left.to_f64_lossy(), right.to_f64_lossy()) {
        (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
        _ => left.to_canonical_string().cmp(&right.to_canonical_string()),
    }
}

fn membership(container: &Value, item: &Value, field: &str) -> Result<bool, NodeError> {
    match container {
        Value::Array(items) => Ok(items.iter().any(|candidate| loosely_equal(candidate, item))),
        Value::String(text) => Ok(text.contains(&item.to_canonical_string())),
        other => Err(NodeError::invalid(field, "string or list", other.type_name())),
    }
}

/// Evaluates `left_value <operator> right_value` and picks the outgoing branch.
pub struct ConditionalNode;

#[async_trait]
impl NodeExecutor for ConditionalNode {
    fn node_type(&self) -> &str {
        "conditional"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<Value, NodeError> {
        // null is a legitimate operand, only an absent key is missing
        let operand = |name: &str| {
            ctx.config
                .get(name)
                .cloned()
                .ok_or_else(|| NodeError::MissingConfig(name.to_string()))
        };
        let left = operand("left_value")?;
        let right = operand("right_value")?;
        let raw_op = ctx
            .config
            .get("operator")
            .map(ValueExt::to_canonical_string)
            .unwrap_or_else(|| "==".to_string());
        let operator = Operator::parse(&raw_op)
            .ok_or_else(|| NodeError::Configuration(format!("Unknown operator: {}", raw_op)))?;

        let result = operator.apply(&left, &right)?;
        ctx.events.info(format!(
            "{} {} {} => {}",
            left.to_canonical_string(),
            operator,
            right.to_canonical_string(),
            result
        ));

        Ok(json!({
            "result": result,
            "left_value": left,
            "right_value": right,
            "operator": operator.as_str(),
        }))
    }

    fn validate_config(&self, config: &ValueMap) -> Result<(), NodeError> {
        for field in ["left_value", "right_value"] {
            if !config.contains_key(field) {
                return Err(NodeError::MissingConfig(field.to_string()));
            }
        }
        match config.get("operator") {
            None => Ok(()),
            Some(Value::String(op)) if op.contains("{{") || Operator::parse(op).is_some() => Ok(()),
            Some(other) => Err(NodeError::Configuration(format!(
                "Unknown operator: {}",
                other.to_canonical_string()
            ))),
        }
    }

    fn is_branching(&self) -> bool {
        true
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Compare two values and follow the on_true or on_false branch".to_string(),
            category: "control".to_string(),
            config: vec![
                ConfigField::required("left_value", "Left operand, may contain templates"),
                ConfigField::optional(
                    "operator",
                    "==, !=, >, <, >=, <=, contains or in (default ==)",
                ),
                ConfigField::required("right_value", "Right operand, may contain templates"),
            ],
        }
    }
}
