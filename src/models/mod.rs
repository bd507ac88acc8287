mod config;
mod document;
mod search;

pub use config::{
    APP_DIR, Config, DEFAULT_API_KEY_ENV, DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_OLLAMA_URL, EmbeddingBackendKind, EmbeddingConfig, IndexingConfig,
    LocalEmbeddingConfig, LoggingConfig, Pooling, RemoteApi, RemoteEmbeddingConfig, SearchConfig,
};
pub use document::{Document, DocumentId, Passage};
pub use search::{IndexStats, OutputFormat, Retrieval, RetrievedPassage, SearchResult};
