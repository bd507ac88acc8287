//! Deterministic feature-hashing embedder.
//!
//! Needs no model or network. Texts sharing words land close together, which
//! is enough for offline use, demos and tests.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{EmbedKind, EmbeddingBackend, normalize};
use crate::error::BackendError;

pub struct HashingBackend {
    id: String,
    dimension: usize,
}

impl HashingBackend {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            id: format!("hashing:d{dimension}"),
            dimension,
        }
    }

    /// Embed one text. Blank text yields the zero vector.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingBackend for HashingBackend {
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
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Lowercased alphanumeric tokens with a naive plural strip.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| {
            let mut token = t.to_lowercase();
            if token.chars().count() > 3 && token.ends_with('s') && !token.ends_with("ss") {
                token.pop();
            }
            token
        })
}
