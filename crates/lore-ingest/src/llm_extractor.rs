use std::sync::Arc;

use async_trait::async_trait;
use lore_ai::{ChatRequest, LlmClient, LoreAiError, Message, ResponseFormat, DEFAULT_LLM_MODEL};
use lore_graph::GraphFragment;

use crate::{ExtractionError, Extractor};

const EXTRACTION_SYSTEM_PROMPT: &str = "You turn chat messages into a knowledge graph. \
Reply with a single JSON object and nothing else.";

const EXTRACTION_INSTRUCTIONS: &str = r#"Each input line has the form `author | message`.

For every line, extract durable facts about its author (preferences, events, plans,
relationships to people or things). Do not copy whole messages.

Return JSON with exactly these top-level keys:
{
  "nodes": [{"id": "...", "label": "...", "properties": {...}}],
  "relationships": [{"source": "<node id>", "target": "<node id>", "label": "..."}],
  "paths": ["<node id> -> RELATIONSHIP -> <node id>"]
}

Rules:
- Node ids must be stable and derived from content, lowercase, `kind:value` style,
  e.g. `author:alanta335`, `color:red`, `anime:death-note`. The same entity must always
  get the same id.
- Every author gets a node with label `Author` and a `username` property.
- Labels are PascalCase for nodes and UPPER_SNAKE_CASE for relationships.
- Only include properties with known values. Never emit null.
- Relationships may only reference ids present in `nodes`.
- If a line carries no durable fact, skip it. Empty arrays are valid.

Example line: `alanta335 | i like red color`
Example output:
{"nodes":[{"id":"author:alanta335","label":"Author","properties":{"username":"alanta335"}},
{"id":"color:red","label":"Color","properties":{"name":"red"}}],
"relationships":[{"source":"author:alanta335","target":"color:red","label":"LIKES_COLOR"}],
"paths":["author:alanta335 -> LIKES_COLOR -> color:red"]}

Messages:
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct LlmGraphExtractorConfig {
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
}

impl Default for LlmGraphExtractorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_LLM_MODEL.to_string(),
            max_tokens: Some(4_096),
            temperature: 0.0,
        }
    }
}

/// Extracts graph fragments by prompting a chat model in JSON mode.
pub struct LlmGraphExtractor {
    client: Arc<dyn LlmClient>,
    config: LlmGraphExtractorConfig,
}

impl LlmGraphExtractor {
    pub fn new(client: Arc<dyn LlmClient>, config: LlmGraphExtractorConfig) -> Self {
        Self { client, config }
    }

    fn build_request(&self, chunk: &[String]) -> ChatRequest {
        let mut prompt = String::from(EXTRACTION_INSTRUCTIONS);
        for line in chunk {
            prompt.push_str("- ");
            prompt.push_str(line);
            prompt.push('\n');
        }
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message::system(EXTRACTION_SYSTEM_PROMPT),
                Message::user(prompt),
            ],
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
            response_format: ResponseFormat::JsonObject,
        }
    }
}

#[async_trait]
impl Extractor for LlmGraphExtractor {
    async fn extract(&self, chunk: &[String]) -> Result<GraphFragment, ExtractionError> {
        let response = self
            .client
            .complete(self.build_request(chunk))
            .await
            .map_err(classify_llm_error)?;
        let fragment = parse_graph_fragment(&response.message.content)?;
        tracing::debug!(
            lines = chunk.len(),
            nodes = fragment.nodes.len(),
            relationships = fragment.relationships.len(),
            total_tokens = response.usage.total_tokens,
            "extracted graph fragment"
        );
        Ok(fragment)
    }
}

fn classify_llm_error(error: LoreAiError) -> ExtractionError {
    if error.is_rate_limited() {
        let retry_after_ms = match &error {
            LoreAiError::HttpStatus { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        };
        return ExtractionError::transient(error.to_string()).with_retry_after_ms(retry_after_ms);
    }
    ExtractionError::non_retryable(error.to_string())
}

/// Parses model output into a fragment, tolerating code fences and prose around the
/// JSON object.
pub fn parse_graph_fragment(raw: &str) -> Result<GraphFragment, ExtractionError> {
    let trimmed = strip_code_fence(raw.trim());
    if trimmed.is_empty() {
        return Err(ExtractionError::non_retryable(
            "extraction response was empty",
        ));
    }
    if let Ok(fragment) = serde_json::from_str::<GraphFragment>(trimmed) {
        return Ok(fragment);
    }

    let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) else {
        return Err(ExtractionError::non_retryable(
            "extraction response contained no JSON object",
        ));
    };
    if end < start {
        return Err(ExtractionError::non_retryable(
            "extraction response contained no JSON object",
        ));
    }
    serde_json::from_str::<GraphFragment>(&trimmed[start..=end]).map_err(|error| {
        ExtractionError::non_retryable(format!("invalid extraction JSON: {error}"))
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}
