use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use lore_ai::{LlmClient, OpenAiCompatibleClient, OpenAiCompatibleConfig};
use lore_discord::{DiscordHistoryConfig, DiscordHistorySource};
use lore_graph::{
    FileWatermarkStore, GraphRetriever, GraphWriter, Neo4jHttpConfig, Neo4jHttpStore,
    SqliteGraphStore, WatermarkStore,
};

use crate::cli_args::{Cli, CliGraphBackend};

/// The three graph-side collaborators, resolved from one backend choice.
pub(crate) struct GraphBackend {
    pub(crate) writer: Arc<dyn GraphWriter>,
    pub(crate) retriever: Arc<dyn GraphRetriever>,
    pub(crate) watermarks: Arc<dyn WatermarkStore>,
}

pub(crate) fn build_graph_backend(cli: &Cli) -> Result<GraphBackend> {
    let mut backend = match cli.graph_backend {
        CliGraphBackend::Sqlite => {
            let store = Arc::new(SqliteGraphStore::new(&cli.sqlite_path).with_context(|| {
                format!(
                    "failed to open sqlite graph store {}",
                    cli.sqlite_path.display()
                )
            })?);
            GraphBackend {
                writer: store.clone(),
                retriever: store.clone(),
                watermarks: store,
            }
        }
        CliGraphBackend::Neo4j => {
            let store = Arc::new(
                Neo4jHttpStore::new(Neo4jHttpConfig {
                    base_url: cli.neo4j_url.clone(),
                    database: cli.neo4j_database.clone(),
                    user: cli.neo4j_user.clone(),
                    password: cli.neo4j_password.clone(),
                    ..Neo4jHttpConfig::default()
                })
                .context("failed to build neo4j client")?,
            );
            GraphBackend {
                writer: store.clone(),
                retriever: store.clone(),
                watermarks: store,
            }
        }
    };

    if let Some(path) = &cli.watermark_file {
        backend.watermarks = Arc::new(FileWatermarkStore::new(path.clone()));
    }
    Ok(backend)
}

pub(crate) fn build_llm_client(cli: &Cli) -> Result<Arc<dyn LlmClient>> {
    let api_key = cli
        .llm_api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| anyhow!("missing LLM API key; set --llm-api-key or LORE_LLM_API_KEY"))?;
    let client = OpenAiCompatibleClient::new(OpenAiCompatibleConfig {
        api_base: cli.llm_api_base.clone(),
        api_key: api_key.to_string(),
        request_timeout_ms: cli.llm_timeout_ms,
    })
    .context("failed to build LLM client")?;
    Ok(Arc::new(client))
}

pub(crate) fn build_history_source(cli: &Cli) -> Result<DiscordHistorySource> {
    let bot_token = cli.discord_bot_token.clone().unwrap_or_default();
    if bot_token.trim().is_empty() {
        return Err(anyhow!(
            "missing discord bot token; set --discord-bot-token or LORE_DISCORD_BOT_TOKEN"
        ));
    }
    DiscordHistorySource::new(DiscordHistoryConfig {
        api_base: cli.discord_api_base.clone(),
        retry_max_attempts: cli.discord_retry_max_attempts,
        ..DiscordHistoryConfig::new(bot_token)
    })
    .context("failed to build discord history source")
}
