pub mod chunker;
pub mod embedding;
pub mod index;
pub mod ingest;
pub mod loader;
pub mod retrieval;
pub mod state;

pub use chunker::{TextChunker, chunk};
pub use embedding::{
    EmbedKind, EmbeddingBackend, EmbeddingProvider, backend_from_config, configured_id,
};
pub use index::VectorIndex;
pub use ingest::{DocumentFailure, IngestOutcome, IngestPhase, IngestReport, Ingestor};
pub use loader::{DocumentSource, collect_sources, extract};
pub use retrieval::{CONTEXT_HEADER, Retriever, format_context};
pub use state::EngineState;
