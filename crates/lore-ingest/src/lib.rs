//! Resumable, idempotent ingestion of a chat history into a knowledge graph.
//!
//! A run pages backwards through a [`HistorySource`] until it reaches the stream's stored
//! watermark, reduces each page to deduplicated fact chunks, pushes every chunk through
//! extraction, compilation and a transactional graph write, and finally commits the newest
//! timestamp that is safe to resume from.

mod answer;
mod chunking;
mod extraction;
mod llm_extractor;
mod orchestrator;
mod paginator;
mod pipeline;
mod source;

#[cfg(test)]
mod test_support;

pub use answer::{QuestionAnswerer, QuestionAnswererConfig, BLANK_QUESTION_REPLY};
pub use chunking::{chunk_facts, dedup_facts, derive_fact, reduce, Chunk};
pub use extraction::{
    extract_with_retry, ExtractionError, ExtractionFailure, ExtractionFailureKind, Extractor,
};
pub use llm_extractor::{parse_graph_fragment, LlmGraphExtractor, LlmGraphExtractorConfig};
pub use orchestrator::{
    IngestConfig, IngestError, IngestPhase, IngestReport, IngestionOrchestrator,
    DEFAULT_CHUNK_SIZE, DEFAULT_PAGE_SIZE,
};
pub use paginator::{CancelFlag, FetchedPage, Paginator, StopReason};
pub use pipeline::{ChunkFailureStage, ChunkOutcome, ChunkPipeline};
pub use source::{HistorySource, HistorySourceError, Item};
