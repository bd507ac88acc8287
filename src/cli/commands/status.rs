use anyhow::Result;

use crate::cli::output::{StatusInfo, get_formatter};
use crate::models::{Config, OutputFormat};
use crate::services::{EngineState, configured_id};

/// Report on the persisted index without constructing the embedding backend.
pub async fn handle_status(config: Config, format: OutputFormat, verbose: bool) -> Result<()> {
    let formatter = get_formatter(format);
    let index_dir = config.indexing.index_dir.clone();

    let state = EngineState::load_or_empty(&index_dir);
    let status = StatusInfo {
        index: state.stats().await,
        index_dir,
        backend: config.embedding.backend.to_string(),
        embedder: configured_id(&config.embedding),
        dimension: config.embedding.dimension,
    };

    println!("{}", formatter.format_status(&status).trim_end());

    if !status.embedder_matches() {
        eprintln!(
            "Warning: the index was built with a different embedding model ({}); re-run ingestion.",
            status.index.embedder_id.as_deref().unwrap_or("unknown")
        );
    } else if verbose && status.index.built {
        eprintln!("Index matches the configured embedder.");
    }

    Ok(())
}
