use std::time::Duration;

use async_trait::async_trait;
use lore_core::FixedDelayRetry;
use lore_graph::GraphFragment;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailureKind {
    /// Rate limiting or a similar condition expected to clear on its own.
    TransientUpstream,
    NonRetryable,
}

impl ExtractionFailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TransientUpstream => "transient_upstream",
            Self::NonRetryable => "non_retryable",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} extraction failure: {message}", .kind.as_str())]
pub struct ExtractionError {
    pub kind: ExtractionFailureKind,
    pub message: String,
    /// Server-suggested wait before the next attempt, when one was given.
    pub retry_after_ms: Option<u64>,
}

impl ExtractionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionFailureKind::TransientUpstream,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            kind: ExtractionFailureKind::NonRetryable,
            message: message.into(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after_ms(mut self, retry_after_ms: Option<u64>) -> Self {
        self.retry_after_ms = retry_after_ms;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ExtractionFailureKind::TransientUpstream
    }
}

#[async_trait]
/// Turns a chunk of `author | content` lines into graph facts.
pub trait Extractor: Send + Sync {
    async fn extract(&self, chunk: &[String]) -> Result<GraphFragment, ExtractionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("extraction failed after {attempts} attempt(s): {error}")]
pub struct ExtractionFailure {
    pub error: ExtractionError,
    pub attempts: usize,
}

/// Calls the extractor, retrying transient failures with a fixed delay until the policy's
/// attempt budget is spent. Returns the fragment together with the attempts used.
pub async fn extract_with_retry(
    extractor: &dyn Extractor,
    chunk: &[String],
    policy: FixedDelayRetry,
) -> Result<(GraphFragment, usize), ExtractionFailure> {
    let mut attempts = 0usize;
    loop {
        attempts = attempts.saturating_add(1);
        let error = match extractor.extract(chunk).await {
            Ok(fragment) => return Ok((fragment, attempts)),
            Err(error) => error,
        };

        if !error.is_transient() || !policy.allows_another_attempt(attempts) {
            return Err(ExtractionFailure { error, attempts });
        }

        let delay_ms = policy.delay_ms(error.retry_after_ms);
        tracing::warn!(
            attempt = attempts,
            max_attempts = policy.max_attempts(),
            delay_ms,
            error = %error.message,
            "extraction rate limited; retrying"
        );
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }
}
