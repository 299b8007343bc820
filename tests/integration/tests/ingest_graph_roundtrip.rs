use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use lore_ai::{
    ChatRequest, ChatResponse, ChatUsage, LlmClient, LoreAiError, Message, ResponseFormat,
};
use lore_core::FixedDelayRetry;
use lore_graph::{MergeCompiler, SqliteGraphStore, WatermarkStore};
use lore_ingest::{
    HistorySource, HistorySourceError, IngestConfig, IngestionOrchestrator, Item,
    LlmGraphExtractor, LlmGraphExtractorConfig, QuestionAnswerer, QuestionAnswererConfig,
    StopReason,
};
use tokio::sync::Mutex as AsyncMutex;

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_714_560_000 + seconds, 0)
        .single()
        .expect("timestamp")
}

/// Channel history held newest first; new messages are prepended.
#[derive(Default)]
struct MemoryChannel {
    history: Mutex<Vec<Item>>,
}

impl MemoryChannel {
    fn post(&self, id: &str, author: &str, content: &str, created_at: DateTime<Utc>) {
        self.history.lock().expect("history lock").insert(
            0,
            Item {
                id: id.to_string(),
                author: author.to_string(),
                content: content.to_string(),
                created_at,
            },
        );
    }

    fn page(&self, start: usize, limit: usize) -> Vec<Item> {
        self.history
            .lock()
            .expect("history lock")
            .iter()
            .skip(start)
            .take(limit)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HistorySource for MemoryChannel {
    async fn fetch_newest(
        &self,
        _stream_id: &str,
        limit: usize,
    ) -> Result<Vec<Item>, HistorySourceError> {
        Ok(self.page(0, limit))
    }

    async fn fetch_before(
        &self,
        _stream_id: &str,
        cursor: &Item,
        limit: usize,
    ) -> Result<Vec<Item>, HistorySourceError> {
        let position = self
            .history
            .lock()
            .expect("history lock")
            .iter()
            .position(|item| item.id == cursor.id);
        Ok(position
            .map(|position| self.page(position + 1, limit))
            .unwrap_or_default())
    }
}

/// Answers extraction prompts with one `Author -[MENTIONED]-> Topic` edge per line.
#[derive(Default)]
struct GraphEchoClient {
    rate_limited_calls: Mutex<usize>,
    fail_on: Mutex<Option<String>>,
    requests: AsyncMutex<Vec<ChatRequest>>,
}

impl GraphEchoClient {
    fn rate_limited_first(calls: usize) -> Self {
        let client = Self::default();
        *client.rate_limited_calls.lock().expect("lock") = calls;
        client
    }

    fn failing_on(needle: &str) -> Self {
        let client = Self::default();
        *client.fail_on.lock().expect("lock") = Some(needle.to_string());
        client
    }

    fn heal(&self) {
        *self.fail_on.lock().expect("lock") = None;
    }

    async fn extraction_calls(&self) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|request| request.response_format == ResponseFormat::JsonObject)
            .count()
    }

    async fn last_prompt(&self) -> String {
        self.requests
            .lock()
            .await
            .last()
            .and_then(|request| request.messages.last())
            .map(|message| message.content.clone())
            .unwrap_or_default()
    }

    fn fragment_json(prompt: &str) -> String {
        let mut nodes = Vec::new();
        let mut relationships = Vec::new();
        let lines = prompt
            .lines()
            .filter_map(|line| line.strip_prefix("- "))
            .filter_map(|line| line.split_once(" | "));
        for (author, content) in lines {
            let topic = content.to_lowercase().replace(' ', "-");
            nodes.push(format!(
                r#"{{"id":"author:{author}","label":"Author","properties":{{"username":"{author}"}}}}"#
            ));
            nodes.push(format!(
                r#"{{"id":"topic:{topic}","label":"Topic","properties":{{"text":"{content}"}}}}"#
            ));
            relationships.push(format!(
                r#"{{"source":"author:{author}","target":"topic:{topic}","label":"MENTIONED"}}"#
            ));
        }
        format!(
            r#"{{"nodes":[{}],"relationships":[{}],"paths":[]}}"#,
            nodes.join(","),
            relationships.join(",")
        )
    }
}

#[async_trait]
impl LlmClient for GraphEchoClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LoreAiError> {
        let prompt = request
            .messages
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();
        let response_format = request.response_format;
        self.requests.lock().await.push(request);

        if response_format == ResponseFormat::Text {
            return Ok(reply("Hey bo, you like **blue**."));
        }
        {
            let mut remaining = self.rate_limited_calls.lock().expect("lock");
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LoreAiError::HttpStatus {
                    status: 429,
                    body: "rate limit reached".to_string(),
                    retry_after_ms: Some(0),
                });
            }
        }
        let fail_on = self.fail_on.lock().expect("lock").clone();
        if let Some(needle) = fail_on {
            if prompt.contains(needle.as_str()) {
                return Err(LoreAiError::HttpStatus {
                    status: 400,
                    body: "content rejected".to_string(),
                    retry_after_ms: None,
                });
            }
        }
        Ok(reply(&Self::fragment_json(&prompt)))
    }
}

fn reply(content: &str) -> ChatResponse {
    ChatResponse {
        message: Message::assistant(content),
        finish_reason: Some("stop".to_string()),
        usage: ChatUsage::default(),
    }
}

fn orchestrator(
    channel: Arc<MemoryChannel>,
    client: Arc<GraphEchoClient>,
    store: Arc<SqliteGraphStore>,
    page_size: usize,
    chunk_size: usize,
) -> IngestionOrchestrator {
    IngestionOrchestrator::new(
        channel,
        Arc::new(LlmGraphExtractor::new(
            client,
            LlmGraphExtractorConfig::default(),
        )),
        Arc::new(MergeCompiler),
        store.clone(),
        store,
        IngestConfig {
            page_size,
            chunk_size,
            retry: FixedDelayRetry::new(3, 0),
        },
    )
}

#[tokio::test]
async fn integration_repeated_runs_only_extract_new_history() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SqliteGraphStore::new(temp.path().join("graph.sqlite")).expect("store"));
    let channel = Arc::new(MemoryChannel::default());
    channel.post("1", "ana", "i like red color", at(1));
    channel.post("2", "bo", "i watch death note", at(2));
    channel.post("3", "cy", "hi", at(3));
    channel.post("4", "ana", "i like red color", at(4));
    let client = Arc::new(GraphEchoClient::default());
    let runner = orchestrator(channel.clone(), client.clone(), store.clone(), 2, 20);

    let first = runner.ingest("chan-1").await.expect("first run");
    assert_eq!(first.stop_reason, StopReason::EndOfHistory);
    assert_eq!(first.items_filtered_in, 4);
    assert_eq!(first.unique_facts, 3);
    assert_eq!(first.new_watermark, Some(at(4)));
    assert_eq!(first.chunks_total, 2, "one chunk per page");
    assert_eq!(client.extraction_calls().await, 2);
    let counts = store.counts().expect("counts");
    assert_eq!((counts.nodes, counts.relationships), (6, 3));

    let idle = runner.ingest("chan-1").await.expect("idle run");
    assert_eq!(idle.stop_reason, StopReason::CaughtUp);
    assert_eq!(idle.new_watermark, None);
    assert_eq!(client.extraction_calls().await, 2);

    channel.post("5", "bo", "i like blue", at(5));
    let resumed = runner.ingest("chan-1").await.expect("resumed run");
    assert_eq!(resumed.stop_reason, StopReason::CaughtUp);
    assert_eq!(resumed.items_filtered_in, 1);
    assert_eq!(resumed.new_watermark, Some(at(5)));
    assert_eq!(client.extraction_calls().await, 3);
    let counts = store.counts().expect("counts");
    assert_eq!((counts.nodes, counts.relationships), (7, 4));
    assert_eq!(
        store.get_watermark("chan-1").await.expect("watermark"),
        Some(at(5))
    );

    let answerer = QuestionAnswerer::new(
        client.clone(),
        store.clone(),
        QuestionAnswererConfig::default(),
    );
    let answer = answerer
        .answer("what do I like?", "bo")
        .await
        .expect("answer");
    assert_eq!(answer, "Hey bo, you like **blue**.");
    let prompt = client.last_prompt().await;
    assert!(prompt.contains("userName: bo"));
    assert!(prompt.contains("topic:i-like-blue"));
}

#[tokio::test]
async fn integration_rate_limited_extraction_is_retried_within_the_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SqliteGraphStore::new(temp.path().join("graph.sqlite")).expect("store"));
    let channel = Arc::new(MemoryChannel::default());
    channel.post("1", "ana", "i like red color", at(1));
    let client = Arc::new(GraphEchoClient::rate_limited_first(2));

    let report = orchestrator(channel, client.clone(), store.clone(), 100, 20)
        .ingest("chan-1")
        .await
        .expect("run");
    assert_eq!(report.chunks_succeeded, 1);
    assert_eq!(report.chunks_failed, 0);
    assert_eq!(report.new_watermark, Some(at(1)));
    assert_eq!(client.extraction_calls().await, 3);
    assert!(store.node("topic:i-like-red-color").expect("node").is_some());
}

#[tokio::test]
async fn integration_failed_chunk_is_reprocessed_by_the_next_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(SqliteGraphStore::new(temp.path().join("graph.sqlite")).expect("store"));
    let channel = Arc::new(MemoryChannel::default());
    channel.post("1", "ana", "first words", at(1));
    channel.post("2", "bo", "poison pill", at(2));
    channel.post("3", "cy", "third words", at(3));
    let client = Arc::new(GraphEchoClient::failing_on("poison"));
    let runner = orchestrator(channel, client.clone(), store.clone(), 100, 1);

    let first = runner.ingest("chan-1").await.expect("first run");
    assert_eq!(first.chunks_total, 3);
    assert_eq!(first.chunks_failed, 1);
    assert_eq!(first.new_watermark, Some(at(1)));
    assert!(store.node("topic:third-words").expect("node").is_some());
    assert!(store.node("topic:poison-pill").expect("node").is_none());

    client.heal();
    let second = runner.ingest("chan-1").await.expect("second run");
    assert_eq!(second.previous_watermark, Some(at(1)));
    assert_eq!(second.items_filtered_in, 2);
    assert_eq!(second.chunks_failed, 0);
    assert_eq!(second.new_watermark, Some(at(3)));
    assert!(store.node("topic:poison-pill").expect("node").is_some());
}
