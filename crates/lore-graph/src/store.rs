use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::{PersistenceOp, PropertyMap};

#[derive(Debug, Error)]
pub enum GraphStoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("graph endpoint returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("neo4j rejected statement ({code}): {message}")]
    Neo4j { code: String, message: String },
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error("watermark file error: {0}")]
    WatermarkFile(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedTransaction {
    pub statements_applied: usize,
    /// Relationship merges that matched no endpoint pair, when the backend can tell.
    pub relationships_skipped: usize,
}

#[async_trait]
/// Applies a batch of ops as one all-or-nothing transaction.
pub trait GraphWriter: Send + Sync {
    async fn apply_transaction(
        &self,
        ops: &[PersistenceOp],
    ) -> Result<AppliedTransaction, GraphStoreError>;
}

#[async_trait]
/// Durable per-stream cursor holding the newest fully processed timestamp.
pub trait WatermarkStore: Send + Sync {
    async fn get_watermark(&self, stream_id: &str)
        -> Result<Option<DateTime<Utc>>, GraphStoreError>;

    async fn set_watermark(
        &self,
        stream_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), GraphStoreError>;
}

#[async_trait]
/// Looks up stored relationships that mention any of the given lowercase terms.
pub trait GraphRetriever: Send + Sync {
    async fn retrieve_facts(
        &self,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<GraphFact>, GraphStoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeView {
    pub id: String,
    pub label: String,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphFact {
    pub source: NodeView,
    pub relationship: String,
    pub target: NodeView,
}

impl GraphFact {
    pub(crate) fn searchable_text(&self) -> String {
        format!("{self}").to_lowercase()
    }

    pub(crate) fn match_count(&self, terms: &[String]) -> usize {
        let haystack = self.searchable_text();
        terms
            .iter()
            .filter(|term| haystack.contains(term.as_str()))
            .count()
    }
}

impl fmt::Display for NodeView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.label, self.id)?;
        if self.properties.is_empty() {
            return Ok(());
        }
        let rendered = self
            .properties
            .iter()
            .map(|(key, value)| match value {
                Value::String(text) => format!("{key}: {text}"),
                other => format!("{key}: {other}"),
            })
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, " {{{rendered}}}")
    }
}

impl fmt::Display for GraphFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -[{}]-> {}",
            self.source, self.relationship, self.target
        )
    }
}

/// Splits free text into lowercase search terms, dropping short and very common words.
pub fn search_terms(text: &str) -> Vec<String> {
    const STOP_WORDS: &[&str] = &[
        "the", "and", "for", "are", "was", "what", "who", "whom", "which", "does", "did", "has",
        "have", "with", "that", "this", "you", "your", "about", "from", "how", "why", "when",
        "where", "there", "their", "they", "them", "any", "can", "could", "would", "should",
    ];
    let mut terms = Vec::new();
    for word in text.split(|ch: char| !ch.is_alphanumeric() && ch != '_' && ch != '-') {
        let word = word.trim_matches('-').to_lowercase();
        if word.chars().count() < 3 || STOP_WORDS.contains(&word.as_str()) {
            continue;
        }
        if !terms.contains(&word) {
            terms.push(word);
        }
    }
    terms
}
