use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub type PropertyMap = BTreeMap<String, Value>;

pub const DEFAULT_NODE_LABEL: &str = "Entity";
pub const DEFAULT_RELATIONSHIP_LABEL: &str = "RELATED_TO";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
/// One idempotent graph write. Applying the same op twice leaves the graph unchanged.
pub enum PersistenceOp {
    MergeNode {
        id: String,
        label: String,
        properties: PropertyMap,
    },
    MergeRelationship {
        source: String,
        target: String,
        label: String,
        properties: PropertyMap,
    },
}

#[derive(Debug, Clone, PartialEq)]
/// Parameterised Cypher text plus its parameter object.
pub struct CypherStatement {
    pub text: String,
    pub parameters: Value,
}

impl CypherStatement {
    pub fn new(text: impl Into<String>, parameters: Value) -> Self {
        Self {
            text: text.into(),
            parameters,
        }
    }

    pub fn to_request_json(&self) -> Value {
        json!({
            "statement": self.text,
            "parameters": self.parameters,
        })
    }
}

impl PersistenceOp {
    pub fn is_relationship(&self) -> bool {
        matches!(self, Self::MergeRelationship { .. })
    }

    /// Renders the op as Cypher. Labels are already sanitised, so they are safe to inline;
    /// every value travels as a parameter.
    pub fn to_cypher(&self) -> CypherStatement {
        match self {
            Self::MergeNode {
                id,
                label,
                properties,
            } => CypherStatement::new(
                format!("MERGE (n:`{label}` {{id: $id}}) SET n += $properties"),
                json!({ "id": id, "properties": properties }),
            ),
            Self::MergeRelationship {
                source,
                target,
                label,
                properties,
            } => CypherStatement::new(
                format!(
                    "MATCH (a {{id: $source}}), (b {{id: $target}}) \
                     MERGE (a)-[r:`{label}`]->(b) SET r += $properties"
                ),
                json!({ "source": source, "target": target, "properties": properties }),
            ),
        }
    }
}

impl fmt::Display for PersistenceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MergeNode { id, label, .. } => write!(f, "merge node {label}({id})"),
            Self::MergeRelationship {
                source,
                target,
                label,
                ..
            } => write!(f, "merge relationship ({source})-[{label}]->({target})"),
        }
    }
}

/// Restricts a label to `[A-Za-z0-9_]`, falling back when nothing usable remains.
pub fn sanitize_label(raw: &str, fallback: &str) -> String {
    let sanitized = raw
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    let trimmed = sanitized.trim_matches('_');
    if trimmed.is_empty() {
        return fallback.to_string();
    }
    if trimmed.starts_with(|ch: char| ch.is_ascii_digit()) {
        return format!("_{trimmed}");
    }
    trimmed.to_string()
}

/// Graph properties must be scalars or homogeneous scalar lists. Nulls are dropped and
/// anything nested is stored as its JSON text.
pub(crate) fn sanitize_properties(raw: Option<&PropertyMap>) -> PropertyMap {
    let Some(raw) = raw else {
        return PropertyMap::new();
    };
    raw.iter()
        .filter_map(|(key, value)| {
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let value = match value {
                Value::Null => return None,
                Value::Object(_) => Value::String(value.to_string()),
                Value::Array(items) if !is_homogeneous_scalar_list(items) => {
                    Value::String(value.to_string())
                }
                other => other.clone(),
            };
            Some((key.to_string(), value))
        })
        .collect()
}

fn is_homogeneous_scalar_list(items: &[Value]) -> bool {
    items.iter().all(Value::is_string)
        || items.iter().all(Value::is_number)
        || items.iter().all(Value::is_boolean)
}
