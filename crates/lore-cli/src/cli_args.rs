use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use lore_ai::{DEFAULT_LLM_API_BASE, DEFAULT_LLM_MODEL};
use lore_core::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
use lore_discord::{DEFAULT_DISCORD_API_BASE, MAX_DISCORD_PAGE_SIZE};
use lore_graph::{DEFAULT_NEO4J_DATABASE, DEFAULT_NEO4J_URL};
use lore_ingest::{DEFAULT_CHUNK_SIZE, DEFAULT_PAGE_SIZE};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_page_size(value: &str) -> Result<usize, String> {
    let parsed = parse_positive_usize(value)?;
    if parsed > MAX_DISCORD_PAGE_SIZE {
        return Err(format!("value must be in range 1..={MAX_DISCORD_PAGE_SIZE}"));
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliGraphBackend {
    Sqlite,
    Neo4j,
}

#[derive(Debug, Parser)]
#[command(
    name = "lore",
    about = "Turns chat channel history into a knowledge graph and answers questions from it",
    version
)]
pub struct Cli {
    #[arg(
        long = "graph-backend",
        env = "LORE_GRAPH_BACKEND",
        value_enum,
        default_value = "sqlite",
        help = "Graph store used for nodes, relationships and (unless --watermark-file is set) watermarks"
    )]
    pub graph_backend: CliGraphBackend,

    #[arg(
        long = "sqlite-path",
        env = "LORE_SQLITE_PATH",
        default_value = ".lore/graph.sqlite",
        help = "SQLite database path for the sqlite graph backend"
    )]
    pub sqlite_path: PathBuf,

    #[arg(
        long = "neo4j-url",
        env = "LORE_NEO4J_URL",
        default_value = DEFAULT_NEO4J_URL,
        help = "Neo4j HTTP endpoint"
    )]
    pub neo4j_url: String,

    #[arg(
        long = "neo4j-user",
        env = "LORE_NEO4J_USER",
        default_value = "neo4j",
        help = "Neo4j basic-auth user"
    )]
    pub neo4j_user: String,

    #[arg(
        long = "neo4j-password",
        env = "LORE_NEO4J_PASSWORD",
        default_value = "",
        hide_env_values = true,
        help = "Neo4j basic-auth password"
    )]
    pub neo4j_password: String,

    #[arg(
        long = "neo4j-database",
        env = "LORE_NEO4J_DATABASE",
        default_value = DEFAULT_NEO4J_DATABASE,
        help = "Neo4j database name"
    )]
    pub neo4j_database: String,

    #[arg(
        long = "watermark-file",
        env = "LORE_WATERMARK_FILE",
        help = "Optional JSON file holding per-channel watermarks instead of the graph backend"
    )]
    pub watermark_file: Option<PathBuf>,

    #[arg(
        long = "discord-api-base",
        env = "LORE_DISCORD_API_BASE",
        default_value = DEFAULT_DISCORD_API_BASE,
        help = "Discord REST API base URL"
    )]
    pub discord_api_base: String,

    #[arg(
        long = "discord-bot-token",
        env = "LORE_DISCORD_BOT_TOKEN",
        hide_env_values = true,
        help = "Discord bot token used to read channel history"
    )]
    pub discord_bot_token: Option<String>,

    #[arg(
        long = "discord-retry-max-attempts",
        env = "LORE_DISCORD_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Maximum attempts per Discord history request on 429/5xx responses"
    )]
    pub discord_retry_max_attempts: usize,

    #[arg(
        long = "llm-api-base",
        env = "LORE_LLM_API_BASE",
        default_value = DEFAULT_LLM_API_BASE,
        help = "Base URL of an OpenAI-compatible chat completions API"
    )]
    pub llm_api_base: String,

    #[arg(
        long = "llm-api-key",
        env = "LORE_LLM_API_KEY",
        hide_env_values = true,
        help = "API key for the chat completions API"
    )]
    pub llm_api_key: Option<String>,

    #[arg(
        long = "llm-model",
        env = "LORE_LLM_MODEL",
        default_value = DEFAULT_LLM_MODEL,
        help = "Model used for graph extraction and answers"
    )]
    pub llm_model: String,

    #[arg(
        long = "llm-timeout-ms",
        env = "LORE_LLM_TIMEOUT_MS",
        default_value_t = 60_000,
        value_parser = parse_positive_u64,
        help = "HTTP timeout for chat completion requests"
    )]
    pub llm_timeout_ms: u64,

    #[arg(
        long = "page-size",
        env = "LORE_PAGE_SIZE",
        default_value_t = DEFAULT_PAGE_SIZE,
        value_parser = parse_page_size,
        help = "History items requested per page (1..=100)"
    )]
    pub page_size: usize,

    #[arg(
        long = "chunk-size",
        env = "LORE_CHUNK_SIZE",
        default_value_t = DEFAULT_CHUNK_SIZE,
        value_parser = parse_positive_usize,
        help = "Facts sent to the extractor per request"
    )]
    pub chunk_size: usize,

    #[arg(
        long = "extract-max-retries",
        env = "LORE_EXTRACT_MAX_RETRIES",
        default_value_t = DEFAULT_MAX_RETRIES,
        help = "Retries per chunk after a rate-limited extraction"
    )]
    pub extract_max_retries: usize,

    #[arg(
        long = "extract-retry-delay-ms",
        env = "LORE_EXTRACT_RETRY_DELAY_MS",
        default_value_t = DEFAULT_RETRY_DELAY_MS,
        help = "Minimum delay before an extraction retry"
    )]
    pub extract_retry_delay_ms: u64,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Ingest new history for one or more channels.
    Ingest {
        #[arg(long = "channel-id", required = true, num_args = 1..)]
        channel_ids: Vec<String>,

        #[arg(long, help = "Print each run report as a JSON line")]
        json: bool,
    },
    /// Answer a question from the knowledge graph.
    Ask {
        #[arg(long)]
        asker: String,

        #[arg(num_args = 0.., trailing_var_arg = true)]
        question: Vec<String>,
    },
    /// Print the committed watermark of a channel.
    Watermark {
        #[arg(long = "channel-id")]
        channel_id: String,
    },
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{parse_page_size, parse_positive_usize, Cli, CliCommand, CliGraphBackend};

    #[test]
    fn unit_parse_page_size_enforces_discord_bounds() {
        assert_eq!(parse_page_size("100"), Ok(100));
        assert!(parse_page_size("0").is_err());
        assert!(parse_page_size("101").is_err());
        assert!(parse_positive_usize("abc").is_err());
    }

    #[test]
    fn functional_ingest_accepts_repeated_channel_ids() {
        let cli = Cli::try_parse_from([
            "lore",
            "--graph-backend",
            "neo4j",
            "--chunk-size",
            "5",
            "ingest",
            "--channel-id",
            "a",
            "b",
            "--channel-id",
            "c",
        ])
        .expect("parse");
        assert_eq!(cli.graph_backend, CliGraphBackend::Neo4j);
        assert_eq!(cli.chunk_size, 5);
        match cli.command {
            CliCommand::Ingest { channel_ids, json } => {
                assert_eq!(channel_ids, vec!["a", "b", "c"]);
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn functional_ask_joins_free_form_question_words() {
        let cli = Cli::try_parse_from(["lore", "ask", "--asker", "ana", "what", "do", "I", "like?"])
            .expect("parse");
        match cli.command {
            CliCommand::Ask { asker, question } => {
                assert_eq!(asker, "ana");
                assert_eq!(question.join(" "), "what do I like?");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn regression_ingest_requires_a_channel_id() {
        assert!(Cli::try_parse_from(["lore", "ingest"]).is_err());
        assert!(Cli::try_parse_from(["lore", "--page-size", "0", "watermark", "--channel-id", "a"])
            .is_err());
    }
}
