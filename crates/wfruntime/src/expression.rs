//! `{{node_id.output.field}}` template resolution.
//!
//! A template string is tokenized once into literal and reference segments and
//! then evaluated against anything implementing [`OutputSource`]. Evaluation
//! only reads, so the same template can be resolved any number of times.

use regex::Regex;
use std::sync::LazyLock;
use wfcore::{ExpressionError, Value, ValueExt, ValueMap};

static TEMPLATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^{}]*)\}\}").expect("template pattern is valid"));

/// Leading accessor that addresses a node's recorded output as a whole.
const OUTPUT_SEGMENT: &str = "output";

/// Read access to the values templates may reference.
pub trait OutputSource {
    /// Recorded output of a completed node.
    fn node_output(&self, node_id: &str) -> Option<&Value>;

    /// Run-wide variables such as `trigger`. Node outputs take precedence.
    fn global(&self, _name: &str) -> Option<&Value> {
        None
    }
}

/// Parsed `{{root.path.to.field}}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub root: String,
    pub path: Vec<String>,
}

impl Reference {
    fn parse(raw: &str) -> Result<Self, ExpressionError> {
        let mut parts = raw.trim().split('.').map(str::trim);
        let root = parts.next().unwrap_or_default();
        if root.is_empty() {
            return Err(ExpressionError::InvalidReference(raw.to_string()));
        }
        let path: Vec<String> = parts.map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return Err(ExpressionError::InvalidReference(raw.to_string()));
        }
        Ok(Self {
            root: root.to_string(),
            path,
        })
    }

    fn display(&self) -> String {
        std::iter::once(self.root.as_str())
            .chain(self.path.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }

    fn unresolved(&self, reason: impl Into<String>) -> ExpressionError {
        ExpressionError::UnresolvedReference {
            reference: self.display(),
            reason: reason.into(),
        }
    }

    pub fn resolve<'a, S: OutputSource + ?Sized>(
        &self,
        source: &'a S,
    ) -> Result<&'a Value, ExpressionError> {
        let (base, path) = match source.node_output(&self.root) {
            Some(output) => {
                let path = match self.path.first() {
                    Some(first) if first == OUTPUT_SEGMENT => &self.path[1..],
                    _ => &self.path[..],
                };
                (output, path)
            }
            None => match source.global(&self.root) {
                Some(global) => (global, &self.path[..]),
                None => {
                    let reason = format!("node '{}' has not produced an output", self.root);
                    return Err(self.unresolved(reason));
                }
            },
        };

        base.lookup_path(path).ok_or_else(|| {
            self.unresolved(format!("path does not exist in output of '{}'", self.root))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Reference(Reference),
}

/// A tokenized template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Tokenize `input`. Text without a complete `{{...}}` pair is a single
    /// literal; an unmatched `{{` stays literal text.
    pub fn parse(input: &str) -> Result<Self, ExpressionError> {
        let mut segments = Vec::new();
        let mut last = 0;

        for captures in TEMPLATE_PATTERN.captures_iter(input) {
            let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Literal(input[last..whole.start()].to_string()));
            }
            segments.push(Segment::Reference(Reference::parse(inner.as_str())?));
            last = whole.end();
        }
        if last < input.len() {
            segments.push(Segment::Literal(input[last..].to_string()));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Reference(r) => Some(r),
            Segment::Literal(_) => None,
        })
    }

    pub fn has_references(&self) -> bool {
        self.references().next().is_some()
    }

    /// Evaluate against `source`.
    ///
    /// A template consisting of exactly one reference yields the referenced
    /// value unchanged; anything else is rendered to a string.
    pub fn evaluate<S: OutputSource + ?Sized>(&self, source: &S) -> Result<Value, ExpressionError> {
        match self.segments.as_slice() {
            [] => Ok(Value::String(String::new())),
            [Segment::Reference(reference)] => reference.resolve(source).cloned(),
            segments => {
                let mut rendered = String::new();
                for segment in segments {
                    match segment {
                        Segment::Literal(text) => rendered.push_str(text),
                        Segment::Reference(reference) => {
                            rendered.push_str(&reference.resolve(source)?.to_canonical_string())
                        }
                    }
                }
                Ok(Value::String(rendered))
            }
        }
    }
}

/// Resolve a single string.
pub fn resolve_str<S: OutputSource + ?Sized>(
    input: &str,
    source: &S,
) -> Result<Value, ExpressionError> {
    Template::parse(input)?.evaluate(source)
}

/// Resolve every string nested anywhere inside `value`.
pub fn resolve_value<S: OutputSource + ?Sized>(
    value: &Value,
    source: &S,
) -> Result<Value, ExpressionError> {
    match value {
        Value::String(s) => resolve_str(s, source),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, source))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => resolve_config(map, source).map(Value::Object),
        other => Ok(other.clone()),
    }
}

/// Resolve a node's config map. Keys are never templated.
pub fn resolve_config<S: OutputSource + ?Sized>(
    config: &ValueMap,
    source: &S,
) -> Result<ValueMap, ExpressionError> {
    config
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, source)?)))
        .collect()
}
