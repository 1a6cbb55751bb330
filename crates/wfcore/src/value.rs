/// Dynamic value type for node config and outputs.
///
/// Workflow definitions arrive as JSON from the editor, so node config and
/// outputs are plain JSON values. `ValueExt` adds the conversions the resolver
/// and the built-in executors need.
pub type Value = serde_json::Value;

/// JSON object used for node config and structured outputs.
pub type ValueMap = serde_json::Map<String, Value>;

pub trait ValueExt {
    /// Canonical string form used when a value is spliced into a larger string.
    ///
    /// Strings are returned verbatim, `null` becomes the empty string, and
    /// arrays/objects are rendered as compact JSON.
    fn to_canonical_string(&self) -> String;

    /// Numeric view of the value. Numeric strings count as numbers so that
    /// values typed into the editor compare against numeric outputs.
    fn to_f64_lossy(&self) -> Option<f64>;

    /// Walk a dotted accessor. Numeric segments index into arrays.
    fn lookup_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value>;

    /// Short type name for error messages.
    fn type_name(&self) -> &'static str;
}

impl ValueExt for Value {
    fn to_canonical_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(_) | Value::Object(_) => self.to_string(),
        }
    }

    fn to_f64_lossy(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return None;
                }
                trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
            }
            _ => None,
        }
    }

    fn lookup_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        let mut current = self;
        for segment in path {
            let segment = segment.as_ref();
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}
