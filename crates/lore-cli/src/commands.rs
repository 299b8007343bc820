use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::SecondsFormat;
use futures_util::future::join_all;
use lore_core::FixedDelayRetry;
use lore_graph::MergeCompiler;
use lore_ingest::{
    IngestConfig, IngestionOrchestrator, LlmGraphExtractor, LlmGraphExtractorConfig,
    QuestionAnswerer, QuestionAnswererConfig,
};

use crate::backends::{build_graph_backend, build_history_source, build_llm_client};
use crate::cli_args::{Cli, CliCommand};

pub(crate) async fn run_cli(cli: Cli) -> Result<()> {
    match &cli.command {
        CliCommand::Ingest { channel_ids, json } => run_ingest(&cli, channel_ids, *json).await,
        CliCommand::Ask { asker, question } => run_ask(&cli, asker, &question.join(" ")).await,
        CliCommand::Watermark { channel_id } => run_watermark(&cli, channel_id).await,
    }
}

fn dedup_channel_ids(channel_ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    channel_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

async fn run_ingest(cli: &Cli, channel_ids: &[String], json: bool) -> Result<()> {
    let channel_ids = dedup_channel_ids(channel_ids);
    if channel_ids.is_empty() {
        bail!("at least one non-empty --channel-id is required");
    }

    let backend = build_graph_backend(cli)?;
    let source = Arc::new(build_history_source(cli)?);
    let extractor = Arc::new(LlmGraphExtractor::new(
        build_llm_client(cli)?,
        LlmGraphExtractorConfig {
            model: cli.llm_model.clone(),
            ..LlmGraphExtractorConfig::default()
        },
    ));
    let orchestrator = IngestionOrchestrator::new(
        source,
        extractor,
        Arc::new(MergeCompiler),
        backend.writer,
        backend.watermarks,
        IngestConfig {
            page_size: cli.page_size,
            chunk_size: cli.chunk_size,
            retry: FixedDelayRetry::new(cli.extract_max_retries, cli.extract_retry_delay_ms),
        },
    );

    let cancel = orchestrator.cancel_flag();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; stopping after in-flight work");
            cancel.cancel();
        }
    });

    let results = join_all(
        channel_ids
            .iter()
            .map(|channel_id| orchestrator.ingest(channel_id)),
    )
    .await;
    signal_task.abort();

    let mut failures = 0usize;
    for (channel_id, result) in channel_ids.iter().zip(results) {
        match result {
            Ok(report) => {
                if json {
                    println!(
                        "{}",
                        serde_json::to_string(&report).context("failed to encode report")?
                    );
                } else {
                    println!("{}", report.summary_line());
                }
            }
            Err(error) => {
                failures += 1;
                tracing::error!(channel_id = %channel_id, error = %error, "ingestion run failed");
            }
        }
    }
    if failures > 0 {
        bail!("{failures} of {} ingestion runs failed", channel_ids.len());
    }
    Ok(())
}

async fn run_ask(cli: &Cli, asker: &str, question: &str) -> Result<()> {
    let backend = build_graph_backend(cli)?;
    let answerer = QuestionAnswerer::new(
        build_llm_client(cli)?,
        backend.retriever,
        QuestionAnswererConfig {
            model: cli.llm_model.clone(),
            ..QuestionAnswererConfig::default()
        },
    );
    let reply = answerer.answer(question, asker).await?;
    println!("{reply}");
    Ok(())
}

async fn run_watermark(cli: &Cli, channel_id: &str) -> Result<()> {
    let backend = build_graph_backend(cli)?;
    let watermark = backend
        .watermarks
        .get_watermark(channel_id)
        .await
        .with_context(|| format!("failed to read watermark for channel '{channel_id}'"))?;
    match watermark {
        Some(value) => println!(
            "{channel_id} {}",
            value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
        ),
        None => println!("{channel_id} none"),
    }
    Ok(())
}
