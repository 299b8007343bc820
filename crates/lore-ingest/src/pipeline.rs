use lore_core::FixedDelayRetry;
use lore_graph::{Compiler, GraphWriter};

use crate::{extract_with_retry, Extractor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFailureStage {
    Extract,
    Compile,
    Persist,
}

impl ChunkFailureStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Compile => "compile",
            Self::Persist => "persist",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Persisted {
        attempts: usize,
        ops_applied: usize,
    },
    Failed {
        stage: ChunkFailureStage,
        attempts: usize,
        reason: String,
    },
}

impl ChunkOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted { .. })
    }
}

/// Extract → compile → apply for a single chunk. Failures are reported, never raised, so
/// one bad chunk cannot abort its siblings.
pub struct ChunkPipeline<'a> {
    extractor: &'a dyn Extractor,
    compiler: &'a dyn Compiler,
    writer: &'a dyn GraphWriter,
    retry: FixedDelayRetry,
}

impl<'a> ChunkPipeline<'a> {
    pub fn new(
        extractor: &'a dyn Extractor,
        compiler: &'a dyn Compiler,
        writer: &'a dyn GraphWriter,
        retry: FixedDelayRetry,
    ) -> Self {
        Self {
            extractor,
            compiler,
            writer,
            retry,
        }
    }

    pub async fn extract_and_persist(&self, chunk: &[String]) -> ChunkOutcome {
        let (fragment, attempts) =
            match extract_with_retry(self.extractor, chunk, self.retry).await {
                Ok(extracted) => extracted,
                Err(failure) => {
                    return ChunkOutcome::Failed {
                        stage: ChunkFailureStage::Extract,
                        attempts: failure.attempts,
                        reason: failure.error.to_string(),
                    }
                }
            };

        let ops = match self.compiler.compile(&fragment) {
            Ok(ops) => ops,
            Err(error) => {
                return ChunkOutcome::Failed {
                    stage: ChunkFailureStage::Compile,
                    attempts,
                    reason: error.to_string(),
                }
            }
        };

        match self.writer.apply_transaction(&ops).await {
            Ok(applied) => ChunkOutcome::Persisted {
                attempts,
                ops_applied: applied.statements_applied,
            },
            Err(error) => ChunkOutcome::Failed {
                stage: ChunkFailureStage::Persist,
                attempts,
                reason: error.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use lore_core::FixedDelayRetry;
    use lore_graph::MergeCompiler;

    use super::{ChunkFailureStage, ChunkOutcome, ChunkPipeline};
    use crate::test_support::{RecordingWriter, ScriptedExtractor};
    use crate::ExtractionError;

    fn chunk() -> Vec<String> {
        vec!["ana | i like red".to_string(), "bo | pizza!".to_string()]
    }

    #[tokio::test]
    async fn functional_successful_chunk_is_written_in_one_transaction() {
        let extractor = ScriptedExtractor::echo();
        let writer = RecordingWriter::default();
        let pipeline =
            ChunkPipeline::new(&extractor, &MergeCompiler, &writer, FixedDelayRetry::new(3, 0));

        let outcome = pipeline.extract_and_persist(&chunk()).await;
        assert_eq!(
            outcome,
            ChunkOutcome::Persisted {
                attempts: 1,
                ops_applied: 6
            }
        );
        assert_eq!(writer.transactions().len(), 1);
    }

    #[tokio::test]
    async fn regression_exhausted_retries_apply_no_ops() {
        let extractor = ScriptedExtractor::always(Err(ExtractionError::transient("429")));
        let writer = RecordingWriter::default();
        let pipeline =
            ChunkPipeline::new(&extractor, &MergeCompiler, &writer, FixedDelayRetry::new(3, 0));

        let outcome = pipeline.extract_and_persist(&chunk()).await;
        match outcome {
            ChunkOutcome::Failed {
                stage, attempts, ..
            } => {
                assert_eq!(stage, ChunkFailureStage::Extract);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(extractor.calls(), 4);
        assert!(writer.transactions().is_empty());
    }

    #[tokio::test]
    async fn regression_writer_failure_marks_chunk_failed() {
        let extractor = ScriptedExtractor::echo();
        let writer = RecordingWriter::failing_on("bo");
        let pipeline =
            ChunkPipeline::new(&extractor, &MergeCompiler, &writer, FixedDelayRetry::new(3, 0));

        let outcome = pipeline.extract_and_persist(&chunk()).await;
        assert!(matches!(
            outcome,
            ChunkOutcome::Failed {
                stage: ChunkFailureStage::Persist,
                ..
            }
        ));
        assert!(writer.transactions().is_empty());
    }

    #[tokio::test]
    async fn regression_compile_failure_skips_write() {
        let extractor = ScriptedExtractor::always(Ok(serde_json::from_value(serde_json::json!({
            "nodes": [{"id": "", "label": "Author"}]
        }))
        .expect("fragment")));
        let writer = RecordingWriter::default();
        let pipeline =
            ChunkPipeline::new(&extractor, &MergeCompiler, &writer, FixedDelayRetry::new(3, 0));

        let outcome = pipeline.extract_and_persist(&chunk()).await;
        assert!(matches!(
            outcome,
            ChunkOutcome::Failed {
                stage: ChunkFailureStage::Compile,
                attempts: 1,
                ..
            }
        ));
        assert!(writer.transactions().is_empty());
    }
}
