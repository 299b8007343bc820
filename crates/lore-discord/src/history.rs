use std::cmp::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lore_core::{parse_retry_after_ms, should_retry_status};
use lore_ingest::{HistorySource, HistorySourceError, Item};
use serde_json::Value;

pub const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10";
pub const MAX_DISCORD_PAGE_SIZE: usize = 100;
const MAX_ERROR_BODY_CHARS: usize = 240;

#[derive(Debug, Clone)]
pub struct DiscordHistoryConfig {
    pub api_base: String,
    pub bot_token: String,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl DiscordHistoryConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_DISCORD_API_BASE.to_string(),
            bot_token: bot_token.into(),
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
            request_timeout_ms: 30_000,
        }
    }
}

/// Reads `GET /channels/{id}/messages` pages with bot authentication.
#[derive(Debug, Clone)]
pub struct DiscordHistorySource {
    client: reqwest::Client,
    api_base: String,
    auth_header: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl DiscordHistorySource {
    pub fn new(config: DiscordHistoryConfig) -> Result<Self, HistorySourceError> {
        let token = config.bot_token.trim();
        if token.is_empty() {
            return Err(HistorySourceError::Config(
                "missing discord bot token".to_string(),
            ));
        }
        let api_base = config.api_base.trim().trim_end_matches('/').to_string();
        if api_base.is_empty() {
            return Err(HistorySourceError::Config(
                "discord api base cannot be empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| {
                HistorySourceError::Config(format!("failed to build discord client: {error}"))
            })?;
        Ok(Self {
            client,
            api_base,
            auth_header: format!("Bot {token}"),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms,
        })
    }

    async fn fetch_page(
        &self,
        channel_id: &str,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Item>, HistorySourceError> {
        let channel_id = channel_id.trim();
        if channel_id.is_empty() {
            return Err(HistorySourceError::Config(
                "discord channel id cannot be empty".to_string(),
            ));
        }
        let url = format!("{}/channels/{channel_id}/messages", self.api_base);
        let limit = limit.clamp(1, MAX_DISCORD_PAGE_SIZE).to_string();
        let mut query = vec![("limit", limit.as_str())];
        if let Some(before) = before {
            query.push(("before", before));
        }

        let raw = self
            .request_text_with_retry(|| {
                self.client
                    .get(url.as_str())
                    .query(&query)
                    .header("authorization", self.auth_header.as_str())
            })
            .await?;
        let items = parse_discord_messages(&raw)?;
        tracing::debug!(
            channel_id,
            before = before.unwrap_or("-"),
            fetched = items.len(),
            "fetched discord history page"
        );
        Ok(items)
    }

    async fn request_text_with_retry<F>(&self, build_request: F) -> Result<String, HistorySourceError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = match build_request().send().await {
                Ok(response) => response,
                Err(error) => {
                    if attempt < self.retry_max_attempts {
                        self.sleep_retry_backoff(attempt, None).await;
                        continue;
                    }
                    return Err(HistorySourceError::Transport(format!(
                        "discord transport error: {error}"
                    )));
                }
            };

            let status = response.status();
            if status.is_success() {
                return response.text().await.map_err(|error| {
                    HistorySourceError::Transport(format!("discord response read error: {error}"))
                });
            }

            let retry_after_ms = response
                .headers()
                .get("retry-after")
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after_ms);
            if should_retry_status(status.as_u16()) && attempt < self.retry_max_attempts {
                tracing::warn!(
                    status = status.as_u16(),
                    attempt,
                    max_attempts = self.retry_max_attempts,
                    "discord request failed; retrying"
                );
                self.sleep_retry_backoff(attempt, retry_after_ms).await;
                continue;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(HistorySourceError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }
    }

    async fn sleep_retry_backoff(&self, attempt: usize, retry_after_ms: Option<u64>) {
        let linear_ms = self
            .retry_base_delay_ms
            .saturating_mul(u64::try_from(attempt).unwrap_or(1));
        let delay_ms = linear_ms.max(retry_after_ms.unwrap_or(0));
        if delay_ms == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
}

#[async_trait]
impl HistorySource for DiscordHistorySource {
    async fn fetch_newest(
        &self,
        stream_id: &str,
        limit: usize,
    ) -> Result<Vec<Item>, HistorySourceError> {
        self.fetch_page(stream_id, None, limit).await
    }

    async fn fetch_before(
        &self,
        stream_id: &str,
        cursor: &Item,
        limit: usize,
    ) -> Result<Vec<Item>, HistorySourceError> {
        self.fetch_page(stream_id, Some(cursor.id.as_str()), limit)
            .await
    }
}

/// Parses a Discord message list into items ordered newest first.
pub fn parse_discord_messages(raw: &str) -> Result<Vec<Item>, HistorySourceError> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|error| HistorySourceError::Parse(format!("invalid discord JSON: {error}")))?;
    let messages = value.as_array().ok_or_else(|| {
        HistorySourceError::Parse("discord messages response must be a JSON array".to_string())
    })?;

    let mut items = messages
        .iter()
        .map(parse_discord_message)
        .collect::<Result<Vec<_>, _>>()?;
    items.sort_by(|left, right| {
        right
            .created_at
            .cmp(&left.created_at)
            .then_with(|| compare_discord_message_ids(&right.id, &left.id))
    });
    Ok(items)
}

fn parse_discord_message(message: &Value) -> Result<Item, HistorySourceError> {
    let id = message
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| HistorySourceError::Parse("discord message is missing an id".to_string()))?;
    let raw_timestamp = message
        .get("timestamp")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            HistorySourceError::Parse(format!("discord message {id} is missing a timestamp"))
        })?;
    let created_at = DateTime::parse_from_rfc3339(raw_timestamp)
        .map_err(|error| {
            HistorySourceError::Parse(format!(
                "discord message {id} has invalid timestamp '{raw_timestamp}': {error}"
            ))
        })?
        .with_timezone(&Utc);
    let author = message
        .get("author")
        .and_then(|author| author.get("username"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(Item {
        id: id.to_string(),
        author: author.to_string(),
        content: content.to_string(),
        created_at,
    })
}

/// Snowflake ids compare numerically; anything unparsable falls back to string order.
pub fn compare_discord_message_ids(left: &str, right: &str) -> Ordering {
    match (left.parse::<u128>(), right.parse::<u128>()) {
        (Ok(left), Ok(right)) => left.cmp(&right),
        _ => left.cmp(right),
    }
}
