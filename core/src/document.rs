use crate::{EngineError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A document as the engine sees it: text leaves under named groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentValue {
    Text(String),
    Node(BTreeMap<String, DocumentValue>),
}

impl DocumentValue {
    /// Convert a JSON body. The root has to be an object and every leaf a string.
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(_) => convert(value, ""),
            other => Err(EngineError::Structure(format!("document root must be an object, got {}", json_kind(other)))),
        }
    }
}

fn convert(value: &Value, path: &str) -> Result<DocumentValue> {
    match value {
        Value::String(s) => Ok(DocumentValue::Text(s.clone())),
        Value::Object(map) => {
            let mut children = BTreeMap::new();
            for (key, child) in map {
                let child_path = if path.is_empty() { key.clone() } else { format!("{path}.{key}") };
                children.insert(key.clone(), convert(child, &child_path)?);
            }
            Ok(DocumentValue::Node(children))
        }
        other => Err(EngineError::Type { path: path.to_string(), found: json_kind(other) }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Output of [`flatten`]: leaf paths with their text, plus the grouping paths
/// that led to them.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Flattened {
    pub fields: BTreeMap<String, String>,
    pub groups: BTreeSet<String>,
}

/// Flatten nested groups into dotted paths of at most `max_depth` segments.
pub fn flatten(doc: &DocumentValue, max_depth: usize) -> Result<Flattened> {
    let root = match doc {
        DocumentValue::Node(children) => children,
        DocumentValue::Text(_) => return Err(EngineError::Structure("document root must be an object".into())),
    };
    let mut out = Flattened::default();
    walk(root, None, 1, max_depth.max(1), &mut out)?;
    if let Some(path) = out.groups.iter().find(|g| out.fields.contains_key(*g)) {
        return Err(EngineError::Structure(format!("{path} is used both as a field and as a group")));
    }
    Ok(out)
}

fn walk(
    node: &BTreeMap<String, DocumentValue>,
    prefix: Option<&str>,
    depth: usize,
    max_depth: usize,
    out: &mut Flattened,
) -> Result<()> {
    for (key, value) in node {
        let path = match prefix {
            Some(p) => format!("{p}.{key}"),
            None => key.clone(),
        };
        match value {
            DocumentValue::Text(text) => {
                if out.fields.contains_key(&path) {
                    return Err(EngineError::Structure(format!("{path} appears twice")));
                }
                out.fields.insert(path, text.clone());
            }
            DocumentValue::Node(children) => {
                if depth >= max_depth {
                    return Err(EngineError::Structure(format!("{path} nests deeper than {max_depth} levels")));
                }
                walk(children, Some(&path), depth + 1, max_depth, out)?;
                out.groups.insert(path);
            }
        }
    }
    Ok(())
}

/// Convert and flatten in one step.
pub fn flatten_json(value: &Value, max_depth: usize) -> Result<Flattened> {
    flatten(&DocumentValue::from_json(value)?, max_depth)
}
