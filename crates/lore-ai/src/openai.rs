use async_trait::async_trait;
use lore_core::parse_retry_after_ms;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    ChatRequest, ChatResponse, ChatUsage, LlmClient, LoreAiError, Message, MessageRole,
    ResponseFormat,
};

pub const DEFAULT_LLM_API_BASE: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_LLM_MODEL: &str = "meta-llama/llama-4-maverick-17b-128e-instruct";
const MAX_ERROR_BODY_CHARS: usize = 480;

#[derive(Debug, Clone)]
/// Connection settings for any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompatibleConfig {
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_ms: u64,
}

impl OpenAiCompatibleConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_LLM_API_BASE.to_string(),
            api_key: api_key.into(),
            request_timeout_ms: 60_000,
        }
    }
}

/// Single-shot chat-completions client. Retrying is left to the caller so one policy
/// governs every attempt.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleClient {
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, LoreAiError> {
        if config.api_key.trim().is_empty() {
            return Err(LoreAiError::MissingApiKey);
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let bearer = format!("Bearer {}", config.api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| {
                LoreAiError::InvalidResponse(format!("invalid API key header: {e}"))
            })?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_millis(
                config.request_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    fn chat_completions_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }

        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LoreAiError> {
        let body = build_chat_request_body(&request);
        let url = self.chat_completions_url();
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion request"
        );

        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if status.is_success() {
            let raw = response.text().await?;
            return parse_chat_response(&raw);
        }

        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after_ms);
        let raw = response.text().await.unwrap_or_default();
        Err(LoreAiError::HttpStatus {
            status: status.as_u16(),
            body: raw.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            retry_after_ms,
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn build_chat_request_body(request: &ChatRequest) -> Value {
    let messages = request
        .messages
        .iter()
        .map(|message| {
            json!({
                "role": role_name(message.role),
                "content": message.content,
            })
        })
        .collect::<Vec<_>>();
    let mut body = json!({
        "model": request.model,
        "messages": messages,
    });

    if request.response_format == ResponseFormat::JsonObject {
        body["response_format"] = json!({ "type": "json_object" });
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

/// Content may arrive as a plain string or as an array of `{type: "text", text}` parts.
fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn parse_chat_response(raw: &str) -> Result<ChatResponse, LoreAiError> {
    let parsed: OpenAiChatResponse = serde_json::from_str(raw)?;
    let choice = parsed.choices.into_iter().next().ok_or_else(|| {
        LoreAiError::InvalidResponse("response contained no choices".to_string())
    })?;

    let usage = parsed
        .usage
        .map(|usage| ChatUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        })
        .unwrap_or_default();

    Ok(ChatResponse {
        message: Message::assistant(content_text(choice.message.content.as_ref())),
        finish_reason: choice.finish_reason,
        usage,
    })
}
