use std::time::Instant;

use anyhow::Result;
use clap::Args;

use crate::cli::output::get_formatter;
use crate::engine::Engine;
use crate::models::{Config, OutputFormat};

#[derive(Debug, Args)]
pub struct SearchArgs {
    #[arg(required = true, help = "Search query text")]
    pub query: String,

    #[arg(long, short = 'k', help = "Maximum number of results to return")]
    pub k: Option<u32>,

    #[arg(long, help = "Minimum relevance score threshold (0.0-1.0)")]
    pub min_score: Option<f32>,
}

pub async fn handle_search(
    args: SearchArgs,
    config: Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let query = args.query.trim();
    if query.is_empty() {
        anyhow::bail!("search query cannot be empty");
    }

    let k = args.k.unwrap_or(config.search.default_k);
    if k == 0 {
        anyhow::bail!("k must be at least 1");
    }

    let min_score = args.min_score.or(config.search.min_score);
    if let Some(score) = min_score
        && !(0.0..=1.0).contains(&score)
    {
        anyhow::bail!("min_score must be between 0.0 and 1.0");
    }

    let formatter = get_formatter(format);
    let engine = Engine::open(config)?;

    if verbose {
        eprintln!("Query: \"{query}\"");
        eprintln!("  k: {k}");
        if let Some(score) = min_score {
            eprintln!("  Min score: {score:.3}");
        }
    }

    if !engine.state().snapshot().await.is_built() {
        println!(
            "{}",
            formatter.format_message("Nothing has been indexed yet.").trim_end()
        );
        return Ok(());
    }

    let start_time = Instant::now();
    let retriever = engine.retriever().clone().with_min_score(min_score);
    let results = match retriever.search(query, k as usize).await {
        Ok(results) => results,
        Err(e) => {
            tracing::warn!("retrieval failed: {e}");
            anyhow::bail!(e.user_message());
        }
    };
    let duration_ms = start_time.elapsed().as_millis() as u64;

    if verbose {
        eprintln!("Timing: {duration_ms}ms");
        eprintln!();
    }

    println!(
        "{}",
        formatter
            .format_search_results(query, &results, duration_ms)
            .trim_end()
    );
    Ok(())
}
