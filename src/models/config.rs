use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::OutputFormat;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-minilm:latest";
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;
pub const DEFAULT_API_KEY_ENV: &str = "EMBEDDING_API_KEY";
pub const APP_DIR: &str = "docrag";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Default config file location (`<config_dir>/docrag/config.toml`).
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR).join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the default location is used
    /// when present and built-in defaults otherwise. The result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match explicit {
            Some(path) => Self::load_from(path)?,
            None => match Self::config_path() {
                Some(path) if path.exists() => Self::load_from(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));

        if self.indexing.chunk_size == 0 {
            return invalid("indexing.chunk_size must be at least 1");
        }
        if self.indexing.chunk_overlap >= self.indexing.chunk_size {
            return invalid("indexing.chunk_overlap must be smaller than indexing.chunk_size");
        }
        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be at least 1");
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be at least 1");
        }
        if self.embedding.max_retries == 0 {
            return invalid("embedding.max_retries must be at least 1");
        }
        if self.search.default_k == 0 {
            return invalid("search.default_k must be at least 1");
        }
        if let Some(score) = self.search.min_score
            && !(0.0..=1.0).contains(&score)
        {
            return invalid("search.min_score must be between 0.0 and 1.0");
        }
        if self.embedding.backend == EmbeddingBackendKind::Remote
            && self.embedding.remote.url.trim().is_empty()
        {
            return invalid("embedding.remote.url must be set for the remote backend");
        }
        Ok(())
    }
}

/// Which embedding backend serves the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    /// HTTP embedding service
    #[default]
    Remote,
    /// ONNX model loaded in-process
    Local,
    /// Feature-hashing embedder, no model required
    Hashing,
}

impl std::fmt::Display for EmbeddingBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbeddingBackendKind::Remote => write!(f, "remote"),
            EmbeddingBackendKind::Local => write!(f, "local"),
            EmbeddingBackendKind::Hashing => write!(f, "hashing"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackendKind,

    #[serde(default = "default_dimension")]
    pub dimension: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default)]
    pub remote: RemoteEmbeddingConfig,

    #[serde(default)]
    pub local: LocalEmbeddingConfig,
}

fn default_dimension() -> u32 {
    DEFAULT_EMBEDDING_DIMENSION
}

fn default_batch_size() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackendKind::default(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            remote: RemoteEmbeddingConfig::default(),
            local: LocalEmbeddingConfig::default(),
        }
    }
}

/// Wire dialect spoken by the remote embedding service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteApi {
    /// Ollama `/api/embed`
    #[default]
    Ollama,
    /// Hugging Face text-embeddings-inference `/embed`
    Tei,
    /// OpenAI-compatible `/v1/embeddings`
    #[serde(rename = "openai")]
    OpenAi,
}

impl std::fmt::Display for RemoteApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoteApi::Ollama => write!(f, "ollama"),
            RemoteApi::Tei => write!(f, "tei"),
            RemoteApi::OpenAi => write!(f, "openai"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEmbeddingConfig {
    #[serde(default)]
    pub api: RemoteApi,

    #[serde(default = "default_remote_url")]
    pub url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Name of the environment variable holding the API key, if any.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_remote_url() -> String {
    DEFAULT_OLLAMA_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

impl Default for RemoteEmbeddingConfig {
    fn default() -> Self {
        Self {
            api: RemoteApi::default(),
            url: default_remote_url(),
            model: default_model(),
            timeout_secs: default_timeout(),
            api_key_env: default_api_key_env(),
        }
    }
}

/// How token embeddings are reduced to one vector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    #[default]
    Mean,
    Cls,
    LastToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalEmbeddingConfig {
    /// Directory with `model.onnx` and `tokenizer.json`.
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub pooling: Pooling,

    /// Prefix prepended to queries (instruction-tuned models).
    #[serde(default)]
    pub query_instruction: String,
}

fn default_model_dir() -> PathBuf {
    data_dir().join("models").join("all-MiniLM-L6-v2")
}

fn default_max_tokens() -> u32 {
    256
}

impl Default for LocalEmbeddingConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            max_tokens: default_max_tokens(),
            pooling: Pooling::default(),
            query_instruction: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    #[serde(default = "default_index_dir")]
    pub index_dir: PathBuf,

    /// Target passage size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,

    /// Characters carried over between adjacent passages.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: u32,

    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".").join(APP_DIR))
}

fn default_index_dir() -> PathBuf {
    data_dir().join("index")
}

fn default_chunk_size() -> u32 {
    800
}

fn default_chunk_overlap() -> u32 {
    100
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
        "**/.DS_Store".to_string(),
        "**/*.tmp".to_string(),
    ]
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            index_dir: default_index_dir(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_file_size: default_max_file_size(),
            exclude_patterns: default_exclude_patterns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_k")]
    pub default_k: u32,

    #[serde(default = "default_max_context_length")]
    pub max_context_length: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,

    #[serde(default)]
    pub default_format: OutputFormat,
}

fn default_k() -> u32 {
    5
}

fn default_max_context_length() -> u32 {
    3000
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_k: default_k(),
            max_context_length: default_max_context_length(),
            min_score: None,
            default_format: OutputFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.embedding.backend, EmbeddingBackendKind::Remote);
        assert_eq!(config.embedding.remote.url, DEFAULT_OLLAMA_URL);
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.indexing.chunk_size, 800);
        assert_eq!(config.indexing.chunk_overlap, 100);
        assert_eq!(config.search.default_k, 5);
        assert_eq!(config.search.max_context_length, 3000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            backend = "hashing"
            dimension = 64

            [embedding.remote]
            api = "openai"

            [indexing]
            chunk_size = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.embedding.backend, EmbeddingBackendKind::Hashing);
        assert_eq!(config.embedding.dimension, 64);
        assert_eq!(config.embedding.batch_size, 5);
        assert_eq!(config.embedding.remote.api, RemoteApi::OpenAi);
        assert_eq!(config.indexing.chunk_size, 200);
        assert_eq!(config.indexing.chunk_overlap, 100);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_overlap_not_smaller_than_chunk() {
        let mut config = Config::default();
        config.indexing.chunk_size = 100;
        config.indexing.chunk_overlap = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_min_score() {
        let mut config = Config::default();
        config.search.min_score = Some(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.embedding.backend = EmbeddingBackendKind::Hashing;
        config.search.min_score = Some(0.2);
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.embedding.backend, EmbeddingBackendKind::Hashing);
        assert_eq!(loaded.search.min_score, Some(0.2));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("missing.toml")));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
