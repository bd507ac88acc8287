//! Error types for the retrieval engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::services::IngestPhase;
use crate::utils::retry::Retryable;

/// Failures reported by a concrete embedding backend.
///
/// These never leave the embedding module: the provider classifies them into
/// [`EmbeddingError::ProviderUnavailable`] or [`EmbeddingError::ProviderRejected`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to connect to embedding backend: {0}")]
    Connection(String),

    #[error("embedding request timed out")]
    Timeout,

    #[error("embedding backend returned status {status}: {body}")]
    Server { status: u16, body: String },

    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_connect() || e.is_request() {
            BackendError::Connection(e.to_string())
        } else if e.is_decode() {
            BackendError::InvalidResponse(e.to_string())
        } else if let Some(status) = e.status() {
            BackendError::Server {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            BackendError::Connection(e.to_string())
        }
    }
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        match self {
            BackendError::Connection(_) | BackendError::Timeout => true,
            // Rate limiting and gateway/service failures are transient
            BackendError::Server { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            BackendError::InvalidResponse(_)
            | BackendError::Model(_)
            | BackendError::Tokenizer(_) => false,
        }
    }
}

/// Errors surfaced by the embedding provider.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Transient failure that persisted through every retry. Retry later.
    #[error("embedding provider unavailable after {attempts} attempt(s): {reason}")]
    ProviderUnavailable { attempts: u32, reason: String },

    /// Permanent failure. The input or the configuration must change.
    #[error("embedding provider rejected the request: {0}")]
    ProviderRejected(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl EmbeddingError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, EmbeddingError::ProviderUnavailable { .. })
    }
}

/// Errors related to building, searching and persisting a vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot build an index from an empty corpus")]
    EmptyCorpus,

    #[error("got {vectors} vectors for {passages} passages")]
    CountMismatch { vectors: usize, passages: usize },

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector {row} contains a non-finite value")]
    NonFiniteVector { row: usize },

    #[error("index at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("index IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced to callers of the retrieval pipeline.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval temporarily unavailable: {0}")]
    Unavailable(EmbeddingError),

    #[error("query rejected by embedding provider: {0}")]
    Rejected(EmbeddingError),

    #[error("active index is incompatible with the embedding provider: {0}")]
    IncompatibleIndex(IndexError),
}

impl RetrievalError {
    /// Text shown to end users for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            RetrievalError::Unavailable(_) => {
                "Retrieval is temporarily unavailable; try again later."
            }
            RetrievalError::Rejected(_) => "The query could not be processed.",
            RetrievalError::IncompatibleIndex(_) => {
                "The index was built with a different embedding model; re-run ingestion."
            }
        }
    }
}

impl From<EmbeddingError> for RetrievalError {
    fn from(e: EmbeddingError) -> Self {
        if e.is_unavailable() {
            RetrievalError::Unavailable(e)
        } else {
            RetrievalError::Rejected(e)
        }
    }
}

/// Per-document extraction failures. Recorded in the ingest report.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file exceeds maximum size: {size} > {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("unsupported document format: {0}")]
    Unsupported(String),

    #[error("document is corrupt: {0}")]
    Corrupt(String),

    #[error("duplicate document id: {0}")]
    Duplicate(String),
}

/// Per-document chunking failures. Recorded in the ingest report.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("document produced no passages")]
    NoContent,
}

/// Failures that abort a whole ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index build failed: {0}")]
    Index(#[from] IndexError),

    #[error("another ingestion is already running")]
    AlreadyRunning,

    #[error("ingestion task failed during {phase}: {reason}")]
    Task { phase: IngestPhase, reason: String },
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Errors raised while assembling an engine at startup.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("embedding backend setup failed: {0}")]
    Backend(#[from] BackendError),
}
