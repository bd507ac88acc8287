use anyhow::Result;
use clap::Args;

use crate::cli::output::get_formatter;
use crate::engine::Engine;
use crate::models::{Config, OutputFormat};

#[derive(Debug, Args)]
pub struct ContextArgs {
    #[arg(required = true, help = "Question to build context for")]
    pub question: String,

    #[arg(long, short = 'k', help = "Number of passages to consider")]
    pub k: Option<u32>,

    #[arg(long, help = "Maximum context length in characters")]
    pub max_length: Option<u32>,
}

pub async fn handle_context(
    args: ContextArgs,
    config: Config,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let k = args.k.unwrap_or(config.search.default_k);
    if k == 0 {
        anyhow::bail!("k must be at least 1");
    }
    let max_length = args.max_length.unwrap_or(config.search.max_context_length);

    let formatter = get_formatter(format);
    let engine = Engine::open(config)?;

    if verbose {
        eprintln!("Question: \"{}\"", args.question.trim());
        eprintln!("  k: {k}, max length: {max_length}");
    }

    let retrieval = match engine
        .retriever()
        .retrieve(&args.question, k as usize, max_length as usize)
        .await
    {
        Ok(retrieval) => retrieval,
        Err(e) => {
            tracing::warn!("retrieval failed: {e}");
            anyhow::bail!(e.user_message());
        }
    };

    println!("{}", formatter.format_retrieval(&retrieval).trim_end());
    Ok(())
}
