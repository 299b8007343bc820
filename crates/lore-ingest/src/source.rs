use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// One message of a history stream. `id` is only meaningful to the source, as a cursor.
pub struct Item {
    pub id: String,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum HistorySourceError {
    #[error("history request failed: {0}")]
    Transport(String),
    #[error("history source returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("history payload could not be parsed: {0}")]
    Parse(String),
    #[error("history source is misconfigured: {0}")]
    Config(String),
}

#[async_trait]
/// Paged, newest-first access to a stream's history.
///
/// Both calls return at most `limit` items ordered newest to oldest; an empty page means
/// there is nothing (older) left.
pub trait HistorySource: Send + Sync {
    async fn fetch_newest(
        &self,
        stream_id: &str,
        limit: usize,
    ) -> Result<Vec<Item>, HistorySourceError>;

    async fn fetch_before(
        &self,
        stream_id: &str,
        cursor: &Item,
        limit: usize,
    ) -> Result<Vec<Item>, HistorySourceError>;
}
