//! Chat-completion client contract and the OpenAI-compatible HTTP client used for graph
//! extraction and answer formatting.
mod openai;
mod types;

pub use openai::{
    OpenAiCompatibleClient, OpenAiCompatibleConfig, DEFAULT_LLM_API_BASE, DEFAULT_LLM_MODEL,
};
pub use types::{
    ChatRequest, ChatResponse, ChatUsage, LlmClient, LoreAiError, Message, MessageRole,
    ResponseFormat,
};
