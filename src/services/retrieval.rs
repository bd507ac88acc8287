//! Query-time pipeline: embed, search, filter and assemble context.

use std::sync::Arc;

use super::embedding::EmbeddingProvider;
use super::index::VectorIndex;
use super::state::EngineState;
use crate::error::RetrievalError;
use crate::models::{Retrieval, RetrievedPassage};
use crate::utils::{MIN_VIABLE_CONTENT, char_len, truncate_at_word};

/// Heading placed before the passages in an assembled context.
pub const CONTEXT_HEADER: &str = "Based on the indexed documents:\n\n";

const TRUNCATION_MARKER: &str = "...";

#[derive(Debug, Clone)]
pub struct Retriever {
    provider: EmbeddingProvider,
    state: Arc<EngineState>,
    min_score: Option<f32>,
}

impl Retriever {
    pub fn new(provider: EmbeddingProvider, state: Arc<EngineState>) -> Self {
        Self {
            provider,
            state,
            min_score: None,
        }
    }

    /// Drop results scoring below `min_score`.
    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    /// The `k` passages most relevant to `query`, best first.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        let index = self.state.snapshot().await;
        self.search_in(&index, query, k).await
    }

    /// Search and assemble a context block of at most `max_length` characters.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        max_length: usize,
    ) -> Result<Retrieval, RetrievalError> {
        let index = self.state.snapshot().await;
        if !index.is_built() {
            return Ok(Retrieval::NothingIndexed);
        }

        let results = self.search_in(&index, query, k).await?;
        let context = format_context(&results, max_length);
        if context.is_empty() {
            tracing::debug!(results = results.len(), "no usable context");
            return Ok(Retrieval::NoRelevantPassages);
        }
        Ok(Retrieval::Context { context, results })
    }

    async fn search_in(
        &self,
        index: &VectorIndex,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        if query.trim().is_empty() || k == 0 || !index.is_built() {
            return Ok(Vec::new());
        }

        let vector = self.provider.embed_query(query).await?;
        let hits = index
            .search(&vector, k)
            .map_err(RetrievalError::IncompatibleIndex)?;

        let results: Vec<RetrievedPassage> = hits
            .into_iter()
            .filter(|hit| self.min_score.is_none_or(|min| hit.score >= min))
            .map(RetrievedPassage::from)
            .collect();
        tracing::debug!(k, results = results.len(), "query searched");
        Ok(results)
    }
}

/// Assemble ranked passages into a citation-annotated context block.
///
/// Passages are added best first while they fit in `max_length` characters.
/// The first one that does not fit is cut at a word boundary when at least
/// [`MIN_VIABLE_CONTENT`] characters of it fit, and nothing follows it.
/// Returns an empty string when less than [`MIN_VIABLE_CONTENT`] characters
/// of passage content made it in.
pub fn format_context(results: &[RetrievedPassage], max_length: usize) -> String {
    let mut ranked: Vec<&RetrievedPassage> = results
        .iter()
        .filter(|r| !r.content.trim().is_empty())
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut context = String::from(CONTEXT_HEADER);
    let mut used = char_len(CONTEXT_HEADER);
    let mut content_chars = 0;

    for result in ranked {
        let label = format!("[{}]\n", result.citation());
        let content = result.content.trim();
        let entry_len = char_len(&label) + char_len(content) + 2;

        if used + entry_len <= max_length {
            context.push_str(&label);
            context.push_str(content);
            context.push_str("\n\n");
            used += entry_len;
            content_chars += char_len(content);
            continue;
        }

        let overhead = char_len(&label) + char_len(TRUNCATION_MARKER) + 2;
        let room = max_length.saturating_sub(used + overhead);
        let shortened = truncate_at_word(content, room);
        if char_len(shortened) >= MIN_VIABLE_CONTENT {
            context.push_str(&label);
            context.push_str(shortened);
            context.push_str(TRUNCATION_MARKER);
            context.push_str("\n\n");
            content_chars += char_len(shortened);
        }
        break;
    }

    if content_chars < MIN_VIABLE_CONTENT {
        return String::new();
    }
    context
}
