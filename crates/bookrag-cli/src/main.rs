//! `bookrag` binary: ingest a documentation site, or query the index.
//!
//! Logs go to stderr through `tracing`; stdout carries only run status
//! and query results. Exit code 0 means the run reached `Done` with no
//! dropped documents and passing validation.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use bookrag_core::{CancelFlag, PipelineConfig, RetryPolicy};
use bookrag_embed::CohereEmbedder;
use bookrag_pipeline::{Pipeline, Retriever, RunReport};
use bookrag_store::QdrantStore;

#[derive(Parser)]
#[command(name = "bookrag", about = "Documentation site ingestion and retrieval")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discover, extract, chunk, embed and store the configured site.
    Run,
    /// Search the stored index and print ranked passages.
    Query {
        /// Query text.
        text: String,
        /// Number of passages to return.
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = PipelineConfig::from_env()?;
    let retry = RetryPolicy::default();
    let embedder = Arc::new(CohereEmbedder::new(&config, retry.clone())?);
    let store = Arc::new(QdrantStore::new(&config, retry)?);

    match cli.command {
        Command::Run => {
            let cancel = CancelFlag::new();
            let handle = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, finishing in-flight work");
                    handle.cancel();
                }
            });

            let pipeline = Pipeline::new(config, embedder, store, cancel)?;
            let report = pipeline.run().await?;
            print_report(&report);
            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Query { text, top_k } => {
            let retriever = Retriever::new(embedder, store);
            let passages = retriever.retrieve(&text, top_k).await?;
            if passages.is_empty() {
                println!("no results");
            }
            for (rank, passage) in passages.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} ({})",
                    rank + 1,
                    passage.score,
                    passage.section,
                    passage.url
                );
                println!("   {}", passage.chunk_text.replace('\n', "\n   "));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_report(report: &RunReport) {
    println!("stage:              {:?}", report.stage);
    println!("urls discovered:    {}", report.urls_discovered);
    println!("documents stored:   {}", report.documents_stored);
    println!("documents skipped:  {}", report.documents_skipped);
    println!("chunks stored:      {}", report.chunks_stored);
    println!("documents failed:   {}", report.failures.len());
    for failure in &report.failures {
        println!("  {} [{}]: {}", failure.url, failure.kind, failure.detail);
    }
    if let Some(validation) = &report.validation {
        println!(
            "validation:         {} ({}/{} probes passed)",
            if validation.passed { "passed" } else { "failed" },
            validation.probes.iter().filter(|p| p.passed).count(),
            validation.probes.len()
        );
    }
}
