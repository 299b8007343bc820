use serde::{Deserialize, Serialize};

use crate::PropertyMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
/// Structured facts extracted from one chunk of chat lines.
pub struct GraphFragment {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub relationships: Vec<GraphRelationship>,
    /// Human-readable traces such as `author:ana -> LIKES_COLOR -> color:red`.
    #[serde(default)]
    pub paths: Vec<String>,
}

impl GraphFragment {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<PropertyMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphRelationship {
    pub source: String,
    pub target: String,
    #[serde(alias = "type")]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<PropertyMap>,
}
