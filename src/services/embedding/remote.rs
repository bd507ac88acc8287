//! HTTP client for remote embedding services.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{EmbedKind, EmbeddingBackend};
use crate::error::BackendError;
use crate::models::{RemoteApi, RemoteEmbeddingConfig};

/// Request body for Ollama `/api/embed` and OpenAI `/v1/embeddings`.
#[derive(Debug, Serialize)]
struct ModelInputRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Request body for text-embeddings-inference `/embed`.
#[derive(Debug, Serialize)]
struct TeiRequest<'a> {
    inputs: &'a [String],
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct TeiResponse(Vec<Vec<f32>>);

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiResponse {
    /// Embeddings in request order; the service may reorder `data`.
    fn into_ordered(mut self) -> Vec<Vec<f32>> {
        self.data.sort_by_key(|d| d.index);
        self.data.into_iter().map(|d| d.embedding).collect()
    }
}

/// Embedding backend for Ollama, TEI or OpenAI-compatible servers.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingBackend {
    client: Client,
    api: RemoteApi,
    base_url: String,
    model: String,
    api_key: Option<String>,
    id: String,
    dimension: usize,
}

impl HttpEmbeddingBackend {
    pub fn new(config: &RemoteEmbeddingConfig, dimension: usize) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        let api_key = if config.api_key_env.is_empty() {
            None
        } else {
            std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
        };

        Ok(Self {
            client,
            api: config.api,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            id: format!("{}:{}", config.api, config.model),
            dimension,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        let path = match self.api {
            RemoteApi::Ollama => "/api/embed",
            RemoteApi::Tei => "/embed",
            RemoteApi::OpenAi => "/v1/embeddings",
        };
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, texts: &[String]) -> Result<reqwest::Response, BackendError> {
        let mut request = self.client.post(self.endpoint());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        request = match self.api {
            RemoteApi::Tei => request.json(&TeiRequest {
                inputs: texts,
                truncate: true,
            }),
            RemoteApi::Ollama | RemoteApi::OpenAi => request.json(&ModelInputRequest {
                model: &self.model,
                input: texts,
            }),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Server { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_texts(
        &self,
        texts: &[String],
        _kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self.post(texts).await?;
        let invalid = |e: reqwest::Error| BackendError::InvalidResponse(e.to_string());
        let embeddings = match self.api {
            RemoteApi::Ollama => response.json::<OllamaResponse>().await.map_err(invalid)?.embeddings,
            RemoteApi::Tei => response.json::<TeiResponse>().await.map_err(invalid)?.0,
            RemoteApi::OpenAi => response
                .json::<OpenAiResponse>()
                .await
                .map_err(invalid)?
                .into_ordered(),
        };

        Ok(embeddings)
    }
}
