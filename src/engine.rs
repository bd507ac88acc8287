//! Engine assembly from configuration.

use std::sync::Arc;

use crate::error::{EngineError, RetrievalError};
use crate::models::{Config, IndexStats, Retrieval};
use crate::services::embedding::retry_config;
use crate::services::{
    DocumentSource, EmbeddingBackend, EmbeddingProvider, EngineState, IngestReport, Ingestor,
    Retriever, TextChunker,
};

/// A configured retrieval engine.
///
/// Owns the one [`EngineState`] of the process; the retriever and ingestor
/// share it and the embedding provider.
pub struct Engine {
    config: Config,
    state: Arc<EngineState>,
    retriever: Retriever,
    ingestor: Arc<Ingestor>,
}

impl Engine {
    /// Resolve the configured backend and load the persisted index.
    pub fn open(config: Config) -> Result<Self, EngineError> {
        config.validate()?;
        let provider = EmbeddingProvider::from_config(&config.embedding)?;
        Ok(Self::with_provider(config, provider))
    }

    /// Build an engine around an already constructed backend.
    pub fn with_backend(
        config: Config,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let provider = EmbeddingProvider::new(
            backend,
            config.embedding.batch_size as usize,
            retry_config(&config.embedding),
        );
        Ok(Self::with_provider(config, provider))
    }

    fn with_provider(config: Config, provider: EmbeddingProvider) -> Self {
        let state = Arc::new(EngineState::load_or_empty(&config.indexing.index_dir));
        let retriever = Retriever::new(provider.clone(), Arc::clone(&state))
            .with_min_score(config.search.min_score);
        let ingestor = Arc::new(Ingestor::new(
            provider,
            Arc::clone(&state),
            TextChunker::new(&config.indexing),
            config.indexing.index_dir.clone(),
            config.indexing.max_file_size,
        ));

        Self {
            config,
            state,
            retriever,
            ingestor,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn ingestor(&self) -> &Arc<Ingestor> {
        &self.ingestor
    }

    pub async fn ingest(&self, sources: Vec<DocumentSource>) -> IngestReport {
        self.ingestor.ingest(sources).await
    }

    /// Retrieve with the configured `k` and context budget.
    pub async fn retrieve(&self, query: &str) -> Result<Retrieval, RetrievalError> {
        self.retriever
            .retrieve(
                query,
                self.config.search.default_k as usize,
                self.config.search.max_context_length as usize,
            )
            .await
    }

    pub async fn stats(&self) -> IndexStats {
        self.state.stats().await
    }
}
