use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::output::get_formatter;
use crate::cli::shutdown_signal;
use crate::engine::Engine;
use crate::models::{Config, OutputFormat};
use crate::services::{IngestOutcome, collect_sources};

#[derive(Debug, Args)]
pub struct IngestArgs {
    #[arg(required = true, help = "Files or directories to ingest")]
    pub paths: Vec<PathBuf>,

    #[arg(long, short = 'e', help = "Additional glob patterns to exclude")]
    pub exclude: Vec<String>,

    #[arg(long, help = "List the documents that would be ingested and exit")]
    pub dry_run: bool,
}

pub async fn handle_ingest(
    args: IngestArgs,
    config: Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let formatter = get_formatter(format);

    let mut exclude = config.indexing.exclude_patterns.clone();
    exclude.extend(args.exclude);
    let sources =
        collect_sources(&args.paths, &exclude).context("failed to collect documents")?;

    if verbose {
        eprintln!("Collected {} documents", sources.len());
        eprintln!("  Index: {}", config.indexing.index_dir.display());
        eprintln!("  Backend: {}", config.embedding.backend);
    }

    if args.dry_run {
        for source in &sources {
            println!("{}", source.id());
        }
        println!(
            "{}",
            formatter
                .format_message(&format!("{} documents would be ingested", sources.len()))
                .trim_end()
        );
        return Ok(());
    }

    let engine = Engine::open(config).context("failed to open engine")?;
    let ingestor = engine.ingestor();

    let pb = if format == OutputFormat::Json {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(120));

    let mut phases = ingestor.subscribe();
    let mut handle = ingestor.spawn(sources);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut cancelled = false;
    let mut watching = true;

    let report = loop {
        tokio::select! {
            joined = &mut handle => break joined.context("ingestion task failed")?,
            changed = phases.changed(), if watching => match changed {
                Ok(()) => pb.set_message(phases.borrow_and_update().to_string()),
                Err(_) => watching = false,
            },
            _ = &mut shutdown, if !cancelled => {
                cancelled = true;
                ingestor.cancel();
                pb.set_message("cancelling...");
            }
        }
    };
    pb.finish_and_clear();

    println!("{}", formatter.format_ingest_report(&report).trim_end());

    if let IngestOutcome::Failed { phase, error } = &report.outcome {
        anyhow::bail!("ingestion failed while {phase}: {error}");
    }
    Ok(())
}
