//! Embedding provider and its pluggable backends.
//!
//! A backend only knows how to turn a batch of non-empty texts into vectors.
//! [`EmbeddingProvider`] wraps the configured backend and owns the policy:
//! zero vectors for blank input, sub-batching, retry with backoff, and
//! classification of failures into retryable and permanent errors.

mod hashing;
mod local;
mod remote;

pub use hashing::HashingBackend;
pub use local::OnnxEmbeddingBackend;
pub use remote::HttpEmbeddingBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{BackendError, EmbeddingError};
use crate::models::{EmbeddingBackendKind, EmbeddingConfig};
use crate::utils::retry::{RetryConfig, RetryResult, with_retry};

/// What the text being embedded will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedKind {
    /// Passages stored in the index
    Document,
    /// Search queries
    Query,
}

/// A concrete embedding implementation.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Stable identifier of the backend and model, e.g. `ollama:all-minilm`.
    fn id(&self) -> &str;

    /// Output dimensionality.
    fn dimension(&self) -> usize;

    /// Embed a batch of non-empty texts, preserving order.
    async fn embed_texts(
        &self,
        texts: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, BackendError>;
}

/// Resolve the configured backend. Called once at startup.
pub fn backend_from_config(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingBackend>, BackendError> {
    let dimension = config.dimension as usize;
    let backend: Arc<dyn EmbeddingBackend> = match config.backend {
        EmbeddingBackendKind::Remote => {
            Arc::new(HttpEmbeddingBackend::new(&config.remote, dimension)?)
        }
        EmbeddingBackendKind::Local => {
            Arc::new(OnnxEmbeddingBackend::load(&config.local, dimension)?)
        }
        EmbeddingBackendKind::Hashing => Arc::new(HashingBackend::new(dimension)),
    };
    tracing::info!(
        backend = %config.backend,
        embedder = backend.id(),
        dimension,
        "embedding backend ready"
    );
    Ok(backend)
}

/// Identifier the configured backend will report, without constructing it.
pub fn configured_id(config: &EmbeddingConfig) -> String {
    match config.backend {
        EmbeddingBackendKind::Remote => format!("{}:{}", config.remote.api, config.remote.model),
        EmbeddingBackendKind::Local => local::backend_id(&config.local.model_dir),
        EmbeddingBackendKind::Hashing => format!("hashing:d{}", config.dimension.max(1)),
    }
}

/// Embedding provider used by ingestion and retrieval.
#[derive(Clone)]
pub struct EmbeddingProvider {
    backend: Arc<dyn EmbeddingBackend>,
    batch_size: usize,
    retry: RetryConfig,
}

impl std::fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("embedder", &self.backend.id())
            .field("dimension", &self.backend.dimension())
            .field("batch_size", &self.batch_size)
            .field("retry", &self.retry)
            .finish()
    }
}

impl EmbeddingProvider {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, batch_size: usize, retry: RetryConfig) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, BackendError> {
        let backend = backend_from_config(config)?;
        Ok(Self::new(
            backend,
            config.batch_size as usize,
            retry_config(config),
        ))
    }

    pub fn id(&self) -> &str {
        self.backend.id()
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed a single passage.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_one(text, EmbedKind::Document).await
    }

    /// Embed a search query.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_one(text, EmbedKind::Query).await
    }

    /// Embed passages in input order. Any failure fails the whole batch.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_with_kind(texts, EmbedKind::Document).await
    }

    async fn embed_one(&self, text: &str, kind: EmbedKind) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_with_kind(&[text.to_string()], kind).await?;
        vectors.pop().ok_or_else(|| {
            EmbeddingError::ProviderRejected("empty embedding response".to_string())
        })
    }

    async fn embed_with_kind(
        &self,
        texts: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let dimension = self.dimension();
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut pending = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                vectors[i] = Some(vec![0.0; dimension]);
            } else {
                pending.push(i);
            }
        }

        for batch_indices in pending.chunks(self.batch_size) {
            let batch: Vec<String> = batch_indices.iter().map(|&i| texts[i].clone()).collect();
            let embedded = self.call_backend(&batch, kind).await?;
            for (&i, vector) in batch_indices.iter().zip(embedded) {
                vectors[i] = Some(vector);
            }
        }

        Ok(vectors.into_iter().flatten().collect())
    }

    async fn call_backend(
        &self,
        batch: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        tracing::debug!(
            embedder = self.id(),
            size = batch.len(),
            ?kind,
            "embedding batch"
        );

        let outcome = with_retry(&self.retry, || self.backend.embed_texts(batch, kind)).await;
        let embedded = match outcome {
            RetryResult::Success(v) => v,
            RetryResult::Failed {
                last_error,
                attempts,
                exhausted: true,
            } => {
                return Err(EmbeddingError::ProviderUnavailable {
                    attempts,
                    reason: last_error.to_string(),
                });
            }
            RetryResult::Failed { last_error, .. } => {
                return Err(EmbeddingError::ProviderRejected(last_error.to_string()));
            }
        };

        if embedded.len() != batch.len() {
            return Err(EmbeddingError::ProviderRejected(format!(
                "requested {} embeddings, received {}",
                batch.len(),
                embedded.len()
            )));
        }
        let expected = self.dimension();
        if let Some(bad) = embedded.iter().find(|v| v.len() != expected) {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        Ok(embedded)
    }
}

pub(crate) fn retry_config(config: &EmbeddingConfig) -> RetryConfig {
    RetryConfig::new(config.max_retries)
        .with_initial_delay(Duration::from_millis(config.initial_backoff_ms))
        .with_max_delay(Duration::from_millis(config.max_backoff_ms))
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub(crate) fn normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted backends for exercising provider and pipeline failure paths.

    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Backend that fails according to a script, then delegates to hashing.
    pub struct ScriptedBackend {
        inner: HashingBackend,
        failures: Mutex<Vec<BackendError>>,
        fail_from: Option<(u32, fn() -> BackendError)>,
        pub calls: AtomicU32,
        pub texts_seen: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub fn healthy(dimension: usize) -> Self {
            Self {
                inner: HashingBackend::new(dimension),
                failures: Mutex::new(Vec::new()),
                fail_from: None,
                calls: AtomicU32::new(0),
                texts_seen: Mutex::new(Vec::new()),
            }
        }

        /// Fail with these errors first (in order), then succeed.
        pub fn failing_first(dimension: usize, mut failures: Vec<BackendError>) -> Self {
            failures.reverse();
            Self {
                failures: Mutex::new(failures),
                ..Self::healthy(dimension)
            }
        }

        pub fn always_failing(dimension: usize, error: fn() -> BackendError) -> Self {
            Self::failing_from(dimension, 0, error)
        }

        /// Succeed for the first `successes` calls, then fail on every call.
        pub fn failing_from(dimension: usize, successes: u32, error: fn() -> BackendError) -> Self {
            Self {
                fail_from: Some((successes, error)),
                ..Self::healthy(dimension)
            }
        }

        pub fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingBackend for ScriptedBackend {
        fn id(&self) -> &str {
            self.inner.id()
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        async fn embed_texts(
            &self,
            texts: &[String],
            kind: EmbedKind,
        ) -> Result<Vec<Vec<f32>>, BackendError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_seen
                .lock()
                .unwrap()
                .extend(texts.iter().cloned());
            if let Some((successes, error)) = self.fail_from
                && call >= successes
            {
                return Err(error());
            }
            if let Some(error) = self.failures.lock().unwrap().pop() {
                return Err(error);
            }
            self.inner.embed_texts(texts, kind).await
        }
    }

    /// Backend returning vectors of the wrong length.
    pub struct WrongDimensionBackend;

    #[async_trait]
    impl EmbeddingBackend for WrongDimensionBackend {
        fn id(&self) -> &str {
            "wrong"
        }

        fn dimension(&self) -> usize {
            8
        }

        async fn embed_texts(
            &self,
            texts: &[String],
            _kind: EmbedKind,
        ) -> Result<Vec<Vec<f32>>, BackendError> {
            Ok(texts.iter().map(|_| vec![1.0; 4]).collect())
        }
    }

    pub fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts).with_initial_delay(Duration::from_millis(1))
    }

    pub fn provider(backend: Arc<dyn EmbeddingBackend>) -> EmbeddingProvider {
        EmbeddingProvider::new(backend, 4, fast_retry(3))
    }

    pub fn unavailable() -> BackendError {
        BackendError::Server {
            status: 503,
            body: "service unavailable".to_string(),
        }
    }
}
