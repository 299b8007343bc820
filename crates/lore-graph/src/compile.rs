use thiserror::Error;

use crate::ops::{sanitize_properties, DEFAULT_NODE_LABEL, DEFAULT_RELATIONSHIP_LABEL};
use crate::{sanitize_label, GraphFragment, PersistenceOp};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("node at index {index} has an empty id")]
    EmptyNodeId { index: usize },
    #[error("relationship at index {index} has an empty {endpoint} id")]
    EmptyRelationshipEndpoint {
        index: usize,
        endpoint: &'static str,
    },
}

/// Turns an extracted fragment into idempotent persistence ops.
pub trait Compiler: Send + Sync {
    fn compile(&self, fragment: &GraphFragment) -> Result<Vec<PersistenceOp>, CompileError>;
}

#[derive(Debug, Clone, Copy, Default)]
/// Emits every node merge before any relationship merge so endpoints exist when the
/// relationship statement runs inside the same transaction.
pub struct MergeCompiler;

impl Compiler for MergeCompiler {
    fn compile(&self, fragment: &GraphFragment) -> Result<Vec<PersistenceOp>, CompileError> {
        let mut ops = Vec::with_capacity(fragment.nodes.len() + fragment.relationships.len());

        for (index, node) in fragment.nodes.iter().enumerate() {
            let id = node.id.trim();
            if id.is_empty() {
                return Err(CompileError::EmptyNodeId { index });
            }
            ops.push(PersistenceOp::MergeNode {
                id: id.to_string(),
                label: sanitize_label(&node.label, DEFAULT_NODE_LABEL),
                properties: sanitize_properties(node.properties.as_ref()),
            });
        }

        for (index, relationship) in fragment.relationships.iter().enumerate() {
            let source = relationship.source.trim();
            if source.is_empty() {
                return Err(CompileError::EmptyRelationshipEndpoint {
                    index,
                    endpoint: "source",
                });
            }
            let target = relationship.target.trim();
            if target.is_empty() {
                return Err(CompileError::EmptyRelationshipEndpoint {
                    index,
                    endpoint: "target",
                });
            }
            ops.push(PersistenceOp::MergeRelationship {
                source: source.to_string(),
                target: target.to_string(),
                label: sanitize_label(&relationship.label, DEFAULT_RELATIONSHIP_LABEL)
                    .to_ascii_uppercase(),
                properties: sanitize_properties(relationship.properties.as_ref()),
            });
        }

        Ok(ops)
    }
}
