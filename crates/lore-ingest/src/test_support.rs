use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lore_graph::{
    AppliedTransaction, GraphFragment, GraphNode, GraphRelationship, GraphStoreError, GraphWriter,
    PersistenceOp, PropertyMap, WatermarkStore,
};
use serde_json::json;

use crate::{CancelFlag, ExtractionError, Extractor, HistorySource, HistorySourceError, Item};

pub(crate) fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0)
        .single()
        .expect("timestamp")
}

pub(crate) fn item(id: &str, author: &str, content: &str, created_at: DateTime<Utc>) -> Item {
    Item {
        id: id.to_string(),
        author: author.to_string(),
        content: content.to_string(),
        created_at,
    }
}

/// In-memory history ordered newest first.
pub(crate) struct ScriptedSource {
    history: Vec<Item>,
    fail_from_call: Option<usize>,
    stuck: bool,
    cancel_after: Option<(usize, CancelFlag)>,
    cursors: Mutex<Vec<Option<String>>>,
}

impl ScriptedSource {
    pub(crate) fn with_history(history: Vec<Item>) -> Self {
        Self {
            history,
            fail_from_call: None,
            stuck: false,
            cancel_after: None,
            cursors: Mutex::new(Vec::new()),
        }
    }

    /// The first `calls` fetches succeed, every later one fails.
    pub(crate) fn failing_after(mut self, calls: usize) -> Self {
        self.fail_from_call = Some(calls);
        self
    }

    /// `fetch_before` keeps returning the newest page.
    pub(crate) fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }

    /// Raises `cancel` once `calls` fetches were served.
    pub(crate) fn cancelling_after(mut self, calls: usize, cancel: CancelFlag) -> Self {
        self.cancel_after = Some((calls, cancel));
        self
    }

    pub(crate) fn cursors(&self) -> Vec<Option<String>> {
        self.cursors.lock().expect("cursor lock").clone()
    }

    fn record(&self, cursor: Option<&Item>) -> Result<(), HistorySourceError> {
        let mut cursors = self.cursors.lock().expect("cursor lock");
        let call_index = cursors.len();
        cursors.push(cursor.map(|item| item.id.clone()));
        if self
            .fail_from_call
            .is_some_and(|fail_from| call_index >= fail_from)
        {
            return Err(HistorySourceError::Transport("scripted outage".to_string()));
        }
        if let Some((calls, cancel)) = &self.cancel_after {
            if cursors.len() >= *calls {
                cancel.cancel();
            }
        }
        Ok(())
    }

    fn page(&self, start: usize, limit: usize) -> Vec<Item> {
        self.history.iter().skip(start).take(limit).cloned().collect()
    }
}

#[async_trait]
impl HistorySource for ScriptedSource {
    async fn fetch_newest(
        &self,
        _stream_id: &str,
        limit: usize,
    ) -> Result<Vec<Item>, HistorySourceError> {
        self.record(None)?;
        Ok(self.page(0, limit))
    }

    async fn fetch_before(
        &self,
        _stream_id: &str,
        cursor: &Item,
        limit: usize,
    ) -> Result<Vec<Item>, HistorySourceError> {
        self.record(Some(cursor))?;
        if self.stuck {
            return Ok(self.page(0, limit));
        }
        match self.history.iter().position(|item| item.id == cursor.id) {
            Some(position) => Ok(self.page(position + 1, limit)),
            None => Ok(Vec::new()),
        }
    }
}

enum ExtractorScript {
    Always(Result<GraphFragment, ExtractionError>),
    Sequence(Mutex<VecDeque<Result<GraphFragment, ExtractionError>>>),
    Echo { fail_on: Option<(String, ExtractionError)> },
}

pub(crate) struct ScriptedExtractor {
    script: ExtractorScript,
    calls: AtomicUsize,
    chunks: Mutex<Vec<Vec<String>>>,
}

impl ScriptedExtractor {
    fn with_script(script: ExtractorScript) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            chunks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn always(result: Result<GraphFragment, ExtractionError>) -> Self {
        Self::with_script(ExtractorScript::Always(result))
    }

    pub(crate) fn sequence(results: Vec<Result<GraphFragment, ExtractionError>>) -> Self {
        Self::with_script(ExtractorScript::Sequence(Mutex::new(results.into())))
    }

    /// Derives a fragment from the chunk lines themselves.
    pub(crate) fn echo() -> Self {
        Self::with_script(ExtractorScript::Echo { fail_on: None })
    }

    /// Like `echo`, but fails any chunk containing a line with `needle`.
    pub(crate) fn echo_failing_on(needle: &str, error: ExtractionError) -> Self {
        Self::with_script(ExtractorScript::Echo {
            fail_on: Some((needle.to_string(), error)),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn chunks(&self) -> Vec<Vec<String>> {
        self.chunks.lock().expect("chunk lock").clone()
    }

    pub(crate) fn fragment_for(chunk: &[String]) -> GraphFragment {
        let mut fragment = GraphFragment::default();
        for line in chunk {
            let (author, content) = line.split_once(" | ").unwrap_or(("unknown", line));
            let author_id = format!("author:{author}");
            let fact_id = format!("fact:{line}");
            fragment.nodes.push(GraphNode {
                id: author_id.clone(),
                label: "Author".to_string(),
                properties: Some(PropertyMap::from([(
                    "username".to_string(),
                    json!(author),
                )])),
            });
            fragment.nodes.push(GraphNode {
                id: fact_id.clone(),
                label: "Fact".to_string(),
                properties: Some(PropertyMap::from([("text".to_string(), json!(content))])),
            });
            fragment.relationships.push(GraphRelationship {
                source: author_id,
                target: fact_id,
                label: "SAID".to_string(),
                properties: None,
            });
        }
        fragment
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, chunk: &[String]) -> Result<GraphFragment, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.chunks.lock().expect("chunk lock").push(chunk.to_vec());
        match &self.script {
            ExtractorScript::Always(result) => result.clone(),
            ExtractorScript::Sequence(results) => results
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_else(|| Err(ExtractionError::non_retryable("script exhausted"))),
            ExtractorScript::Echo { fail_on } => {
                if let Some((needle, error)) = fail_on {
                    if chunk.iter().any(|line| line.contains(needle.as_str())) {
                        return Err(error.clone());
                    }
                }
                Ok(Self::fragment_for(chunk))
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct RecordingWriter {
    fail_on: Option<String>,
    transactions: Mutex<Vec<Vec<PersistenceOp>>>,
}

impl RecordingWriter {
    /// Rejects any transaction with an op whose rendering contains `needle`.
    pub(crate) fn failing_on(needle: &str) -> Self {
        Self {
            fail_on: Some(needle.to_string()),
            transactions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn transactions(&self) -> Vec<Vec<PersistenceOp>> {
        self.transactions.lock().expect("transaction lock").clone()
    }
}

#[async_trait]
impl GraphWriter for RecordingWriter {
    async fn apply_transaction(
        &self,
        ops: &[PersistenceOp],
    ) -> Result<AppliedTransaction, GraphStoreError> {
        if let Some(needle) = &self.fail_on {
            if ops.iter().any(|op| op.to_string().contains(needle.as_str())) {
                return Err(GraphStoreError::HttpStatus {
                    status: 503,
                    body: "scripted write failure".to_string(),
                });
            }
        }
        self.transactions
            .lock()
            .expect("transaction lock")
            .push(ops.to_vec());
        Ok(AppliedTransaction {
            statements_applied: ops.len(),
            relationships_skipped: 0,
        })
    }
}

#[derive(Default)]
pub(crate) struct MemoryWatermarks {
    values: Mutex<HashMap<String, DateTime<Utc>>>,
    writes: Mutex<Vec<(String, DateTime<Utc>)>>,
    fail_reads: bool,
    fail_writes: bool,
}

impl MemoryWatermarks {
    pub(crate) fn with_value(stream_id: &str, value: DateTime<Utc>) -> Self {
        let store = Self::default();
        store
            .values
            .lock()
            .expect("watermark lock")
            .insert(stream_id.to_string(), value);
        store
    }

    pub(crate) fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub(crate) fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub(crate) fn value(&self, stream_id: &str) -> Option<DateTime<Utc>> {
        self.values
            .lock()
            .expect("watermark lock")
            .get(stream_id)
            .copied()
    }

    pub(crate) fn writes(&self) -> Vec<(String, DateTime<Utc>)> {
        self.writes.lock().expect("watermark lock").clone()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarks {
    async fn get_watermark(
        &self,
        stream_id: &str,
    ) -> Result<Option<DateTime<Utc>>, GraphStoreError> {
        if self.fail_reads {
            return Err(GraphStoreError::WatermarkFile("scripted read failure".to_string()));
        }
        Ok(self.value(stream_id))
    }

    async fn set_watermark(
        &self,
        stream_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), GraphStoreError> {
        if self.fail_writes {
            return Err(GraphStoreError::WatermarkFile("scripted write failure".to_string()));
        }
        self.writes
            .lock()
            .expect("watermark lock")
            .push((stream_id.to_string(), timestamp));
        self.values
            .lock()
            .expect("watermark lock")
            .insert(stream_id.to_string(), timestamp);
        Ok(())
    }
}
