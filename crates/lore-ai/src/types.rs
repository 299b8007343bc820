use async_trait::async_trait;
use lore_core::is_rate_limited_status;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MessageRole` values.
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Text,
    JsonObject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub response_format: ResponseFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ChatUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub message: Message,
    pub finish_reason: Option<String>,
    pub usage: ChatUsage,
}

#[derive(Debug, Error)]
/// Enumerates supported `LoreAiError` values.
pub enum LoreAiError {
    #[error("missing API key")]
    MissingApiKey,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        status: u16,
        body: String,
        retry_after_ms: Option<u64>,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl LoreAiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::Http(error) => error.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status().is_some_and(is_rate_limited_status)
    }
}

#[async_trait]
/// Trait contract for `LlmClient` behavior.
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, LoreAiError>;
}

#[cfg(test)]
mod tests {
    use super::{LoreAiError, Message, MessageRole, ResponseFormat};

    #[test]
    fn unit_message_constructors_set_roles() {
        assert_eq!(Message::system("s").role, MessageRole::System);
        assert_eq!(Message::user("u").role, MessageRole::User);
        assert_eq!(Message::assistant("a").content, "a");
    }

    #[test]
    fn unit_rate_limit_classification_uses_status() {
        let limited = LoreAiError::HttpStatus {
            status: 429,
            body: "slow down".to_string(),
            retry_after_ms: Some(1_000),
        };
        assert!(limited.is_rate_limited());

        let unavailable = LoreAiError::HttpStatus {
            status: 503,
            body: String::new(),
            retry_after_ms: None,
        };
        assert!(!unavailable.is_rate_limited());
        assert!(!LoreAiError::MissingApiKey.is_rate_limited());
    }

    #[test]
    fn unit_response_format_serializes_snake_case() {
        let raw = serde_json::to_string(&ResponseFormat::JsonObject).expect("encode");
        assert_eq!(raw, "\"json_object\"");
    }
}
