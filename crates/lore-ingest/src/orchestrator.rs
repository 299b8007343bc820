use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lore_core::{current_unix_timestamp_ms, elapsed_ms_since, FixedDelayRetry};
use lore_graph::{Compiler, GraphStoreError, GraphWriter, WatermarkStore};
use serde::Serialize;
use thiserror::Error;

use crate::{
    chunk_facts, derive_fact, CancelFlag, ChunkOutcome, ChunkPipeline, Extractor, HistorySource,
    Paginator, StopReason,
};

pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_CHUNK_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    pub page_size: usize,
    pub chunk_size: usize,
    pub retry: FixedDelayRetry,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: FixedDelayRetry::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPhase {
    Idle,
    Paging,
    Deduplicating,
    Extracting,
    Committing,
    Stopped,
}

impl IngestPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Paging => "paging",
            Self::Deduplicating => "deduplicating",
            Self::Extracting => "extracting",
            Self::Committing => "committing",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub stream_id: String,
    pub previous_watermark: Option<DateTime<Utc>>,
    /// Set only when this run committed a new watermark.
    pub new_watermark: Option<DateTime<Utc>>,
    pub stop_reason: StopReason,
    pub pages_fetched: usize,
    pub items_fetched: usize,
    pub items_filtered_in: usize,
    pub unique_facts: usize,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
    pub ops_applied: usize,
    pub elapsed_ms: u64,
}

impl IngestReport {
    pub fn summary_line(&self) -> String {
        let watermark = match self.new_watermark {
            Some(value) => format!("watermark={}", value.to_rfc3339()),
            None => "no new messages".to_string(),
        };
        format!(
            "stream={} {} stop={} pages={} items={} filtered_in={} facts={} chunks={} ok={} failed={} ops={} elapsed_ms={}",
            self.stream_id,
            watermark,
            self.stop_reason.as_str(),
            self.pages_fetched,
            self.items_fetched,
            self.items_filtered_in,
            self.unique_facts,
            self.chunks_total,
            self.chunks_succeeded,
            self.chunks_failed,
            self.ops_applied,
            self.elapsed_ms
        )
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read watermark for stream '{stream_id}': {source}")]
    WatermarkRead {
        stream_id: String,
        source: GraphStoreError,
    },
    #[error("failed to commit watermark {timestamp} for stream '{stream_id}': {source}")]
    WatermarkCommit {
        stream_id: String,
        timestamp: DateTime<Utc>,
        source: GraphStoreError,
    },
}

/// Tracks which items are safe to resume past.
///
/// The candidate is the newest successful item strictly older than every failed item, so a
/// failure pins the watermark below it until a later run gets it through.
#[derive(Debug, Default)]
struct WatermarkCandidate {
    succeeded: Vec<DateTime<Utc>>,
    oldest_failed: Option<DateTime<Utc>>,
}

impl WatermarkCandidate {
    fn record(&mut self, created_at: DateTime<Utc>, persisted: bool) {
        if persisted {
            self.succeeded.push(created_at);
            return;
        }
        self.oldest_failed = Some(match self.oldest_failed {
            Some(current) => current.min(created_at),
            None => created_at,
        });
    }

    fn resolve(&self) -> Option<DateTime<Utc>> {
        self.succeeded
            .iter()
            .copied()
            .filter(|created_at| {
                self.oldest_failed
                    .map_or(true, |oldest_failed| *created_at < oldest_failed)
            })
            .max()
    }
}

/// Runs resumable ingestion for one stream at a time.
pub struct IngestionOrchestrator {
    source: Arc<dyn HistorySource>,
    extractor: Arc<dyn Extractor>,
    compiler: Arc<dyn Compiler>,
    writer: Arc<dyn GraphWriter>,
    watermarks: Arc<dyn WatermarkStore>,
    config: IngestConfig,
    cancel: CancelFlag,
}

impl IngestionOrchestrator {
    pub fn new(
        source: Arc<dyn HistorySource>,
        extractor: Arc<dyn Extractor>,
        compiler: Arc<dyn Compiler>,
        writer: Arc<dyn GraphWriter>,
        watermarks: Arc<dyn WatermarkStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            source,
            extractor,
            compiler,
            writer,
            watermarks,
            config,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Ingests everything newer than the stream's watermark and commits the new one.
    ///
    /// Only watermark store failures are returned as errors. A failing source ends paging
    /// like the end of history, so progress confirmed before it is still committed. Chunk
    /// failures are absorbed into the report and hold the watermark below them.
    #[tracing::instrument(
        name = "lore.ingest.run",
        skip(self),
        fields(
            page_size = self.config.page_size,
            chunk_size = self.config.chunk_size,
            max_retries = self.config.retry.max_retries
        )
    )]
    pub async fn ingest(&self, stream_id: &str) -> Result<IngestReport, IngestError> {
        let started_unix_ms = current_unix_timestamp_ms();
        log_phase(stream_id, IngestPhase::Idle);
        let previous_watermark = self
            .watermarks
            .get_watermark(stream_id)
            .await
            .map_err(|source| IngestError::WatermarkRead {
                stream_id: stream_id.to_string(),
                source,
            })?;
        tracing::info!(
            stream_id,
            previous_watermark = ?previous_watermark,
            "starting ingestion run"
        );

        let pipeline = ChunkPipeline::new(
            self.extractor.as_ref(),
            self.compiler.as_ref(),
            self.writer.as_ref(),
            self.config.retry,
        );
        let mut paginator = Paginator::new(
            self.source.as_ref(),
            stream_id,
            previous_watermark,
            self.config.page_size,
            self.cancel.clone(),
        );
        let mut fact_outcomes: HashMap<String, bool> = HashMap::new();
        let mut candidate = WatermarkCandidate::default();
        let mut report = IngestReport {
            stream_id: stream_id.to_string(),
            previous_watermark,
            new_watermark: None,
            stop_reason: StopReason::EndOfHistory,
            pages_fetched: 0,
            items_fetched: 0,
            items_filtered_in: 0,
            unique_facts: 0,
            chunks_total: 0,
            chunks_succeeded: 0,
            chunks_failed: 0,
            ops_applied: 0,
            elapsed_ms: 0,
        };

        log_phase(stream_id, IngestPhase::Paging);
        while let Some(page) = paginator.next_page().await {
            report.items_filtered_in = report.items_filtered_in.saturating_add(page.items.len());

            log_phase(stream_id, IngestPhase::Deduplicating);
            let page_facts = page.items.iter().map(derive_fact).collect::<Vec<_>>();
            let new_facts = page_facts
                .iter()
                .filter(|fact| !fact_outcomes.contains_key(fact.as_str()))
                .cloned()
                .collect::<BTreeSet<_>>();
            report.unique_facts = report.unique_facts.saturating_add(new_facts.len());
            let chunks = chunk_facts(&new_facts, self.config.chunk_size);

            log_phase(stream_id, IngestPhase::Extracting);
            for (chunk_index, chunk) in chunks.iter().enumerate() {
                report.chunks_total = report.chunks_total.saturating_add(1);
                let outcome = pipeline.extract_and_persist(chunk).await;
                match &outcome {
                    ChunkOutcome::Persisted {
                        attempts,
                        ops_applied,
                    } => {
                        report.chunks_succeeded = report.chunks_succeeded.saturating_add(1);
                        report.ops_applied = report.ops_applied.saturating_add(*ops_applied);
                        tracing::debug!(
                            stream_id,
                            chunk_index,
                            facts = chunk.len(),
                            attempts,
                            ops_applied,
                            "chunk persisted"
                        );
                    }
                    ChunkOutcome::Failed {
                        stage,
                        attempts,
                        reason,
                    } => {
                        report.chunks_failed = report.chunks_failed.saturating_add(1);
                        tracing::warn!(
                            stream_id,
                            chunk_index,
                            facts = chunk.len(),
                            stage = stage.as_str(),
                            attempts,
                            reason = %reason,
                            "ingestion_chunk_failed"
                        );
                    }
                }
                let persisted = outcome.is_persisted();
                for fact in chunk {
                    fact_outcomes.insert(fact.clone(), persisted);
                }
            }

            for (item, fact) in page.items.iter().zip(&page_facts) {
                let persisted = fact_outcomes.get(fact).copied().unwrap_or(false);
                candidate.record(item.created_at, persisted);
            }
            log_phase(stream_id, IngestPhase::Paging);
        }

        let stop_reason = paginator.stop_reason().unwrap_or(StopReason::EndOfHistory);
        report.stop_reason = stop_reason;
        report.pages_fetched = paginator.pages_fetched();
        report.items_fetched = paginator.items_fetched();
        log_phase(stream_id, IngestPhase::Stopped);

        let next_watermark = candidate
            .resolve()
            .filter(|next| previous_watermark.map_or(true, |previous| *next > previous));
        if let Some(next) = next_watermark {
            if !stop_reason.is_complete() {
                tracing::warn!(
                    stream_id,
                    stop_reason = stop_reason.as_str(),
                    watermark = %next.to_rfc3339(),
                    "paging stopped early; committing confirmed progress"
                );
            }
            log_phase(stream_id, IngestPhase::Committing);
            self.watermarks
                .set_watermark(stream_id, next)
                .await
                .map_err(|source| IngestError::WatermarkCommit {
                    stream_id: stream_id.to_string(),
                    timestamp: next,
                    source,
                })?;
            report.new_watermark = Some(next);
        }

        report.elapsed_ms = elapsed_ms_since(started_unix_ms);
        log_phase(stream_id, IngestPhase::Idle);
        tracing::info!(
            stream_id,
            new_watermark = ?report.new_watermark,
            stop_reason = stop_reason.as_str(),
            chunks_total = report.chunks_total,
            chunks_failed = report.chunks_failed,
            elapsed_ms = report.elapsed_ms,
            "ingestion run finished"
        );
        Ok(report)
    }
}

fn log_phase(stream_id: &str, phase: IngestPhase) {
    tracing::trace!(stream_id, phase = phase.as_str(), "ingestion phase");
}
