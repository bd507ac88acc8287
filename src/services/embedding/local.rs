use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ort::session::{Session, SessionInputValue, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tokenizers::{PaddingParams, PaddingStrategy, TruncationParams, TruncationStrategy};

use super::{EmbedKind, EmbeddingBackend, normalize};
use crate::error::BackendError;
use crate::models::{LocalEmbeddingConfig, Pooling};

struct OnnxModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    input_names: Vec<String>,
    pooling: Pooling,
    query_instruction: String,
}

/// In-process ONNX sentence embedder.
pub struct OnnxEmbeddingBackend {
    model: Arc<OnnxModel>,
    id: String,
    dimension: usize,
}

impl OnnxEmbeddingBackend {
    pub fn load(config: &LocalEmbeddingConfig, dimension: usize) -> Result<Self, BackendError> {
        let model_dir = config.model_dir.as_path();
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        for path in [&model_path, &tokenizer_path] {
            if !path.exists() {
                return Err(BackendError::Model(format!(
                    "model file not found: {}",
                    path.display()
                )));
            }
        }

        let session = Session::builder()
            .map_err(|e: ort::Error| BackendError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e: ort::Error| BackendError::Model(e.to_string()))?
            .with_intra_threads(num_cpus())
            .map_err(|e: ort::Error| BackendError::Model(e.to_string()))?
            .commit_from_file(&model_path)
            .map_err(|e: ort::Error| BackendError::Model(e.to_string()))?;
        let input_names = session.inputs.iter().map(|i| i.name.clone()).collect();

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| BackendError::Tokenizer(e.to_string()))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_tokens as usize,
                strategy: TruncationStrategy::LongestFirst,
                ..Default::default()
            }))
            .map_err(|e| BackendError::Tokenizer(e.to_string()))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        Ok(Self {
            model: Arc::new(OnnxModel {
                session: Mutex::new(session),
                tokenizer,
                input_names,
                pooling: config.pooling,
                query_instruction: config.query_instruction.clone(),
            }),
            id: backend_id(model_dir),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OnnxEmbeddingBackend {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_texts(
        &self,
        texts: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, BackendError> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || model.embed(texts, kind))
            .await
            .map_err(|e| BackendError::Model(format!("inference task failed: {e}")))?
    }
}

impl OnnxModel {
    fn embed(&self, texts: Vec<String>, kind: EmbedKind) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let processed: Vec<String> = match kind {
            EmbedKind::Query if !self.query_instruction.is_empty() => texts
                .into_iter()
                .map(|t| format!("{}{}", self.query_instruction, t))
                .collect(),
            _ => texts,
        };

        let encodings = self
            .tokenizer
            .encode_batch(processed, true)
            .map_err(|e| BackendError::Tokenizer(e.to_string()))?;

        let batch_size = encodings.len();
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let mut token_type_ids = vec![0i64; batch_size * max_len];
        let mut position_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();
            for j in 0..ids.len() {
                let at = i * max_len + j;
                input_ids[at] = ids[j] as i64;
                attention_mask[at] = mask[j] as i64;
                token_type_ids[at] = types.get(j).copied().unwrap_or(0) as i64;
                position_ids[at] = j as i64;
            }
        }
        let mask = attention_mask.clone();

        // Feed only the tensors this graph declares
        let mut inputs: Vec<(String, SessionInputValue<'_>)> = Vec::new();
        for name in &self.input_names {
            let data = match name.as_str() {
                "input_ids" => input_ids.clone(),
                "attention_mask" => attention_mask.clone(),
                "token_type_ids" => token_type_ids.clone(),
                "position_ids" => position_ids.clone(),
                other => {
                    return Err(BackendError::Model(format!(
                        "unsupported model input: {other}"
                    )));
                }
            };
            let tensor = Tensor::from_array(([batch_size, max_len], data))
                .map_err(|e: ort::Error| BackendError::Model(e.to_string()))?;
            inputs.push((name.clone(), tensor.into()));
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| BackendError::Model("session lock poisoned".to_string()))?;
        let outputs = session
            .run(inputs)
            .map_err(|e: ort::Error| BackendError::Model(e.to_string()))?;
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e: ort::Error| BackendError::Model(e.to_string()))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let embeddings = match dims.as_slice() {
            // Token embeddings: reduce with the configured pooling
            &[b, seq, hidden] if b == batch_size => (0..batch_size)
                .map(|i| {
                    let rows = &data[i * seq * hidden..(i + 1) * seq * hidden];
                    let row_mask = &mask[i * max_len..i * max_len + seq.min(max_len)];
                    let mut v = pool(rows, row_mask, hidden, self.pooling);
                    normalize(&mut v);
                    v
                })
                .collect(),
            // Already pooled sentence embeddings
            &[b, hidden] if b == batch_size => (0..batch_size)
                .map(|i| {
                    let mut v = data[i * hidden..(i + 1) * hidden].to_vec();
                    normalize(&mut v);
                    v
                })
                .collect(),
            _ => {
                return Err(BackendError::InvalidResponse(format!(
                    "unexpected output shape: {dims:?}"
                )));
            }
        };

        Ok(embeddings)
    }
}

/// Reduce `seq x hidden` token rows to one vector.
fn pool(rows: &[f32], mask: &[i64], hidden: usize, pooling: Pooling) -> Vec<f32> {
    let token = |t: usize| &rows[t * hidden..(t + 1) * hidden];
    match pooling {
        Pooling::Cls => token(0).to_vec(),
        Pooling::LastToken => {
            let last = mask.iter().rposition(|&m| m != 0).unwrap_or(0);
            token(last).to_vec()
        }
        Pooling::Mean => {
            let mut sum = vec![0.0f32; hidden];
            let mut count = 0.0f32;
            for (t, _) in mask.iter().enumerate().filter(|(_, m)| **m != 0) {
                for (acc, x) in sum.iter_mut().zip(token(t)) {
                    *acc += x;
                }
                count += 1.0;
            }
            if count > 0.0 {
                sum.iter_mut().for_each(|x| *x /= count);
            }
            sum
        }
    }
}

/// `onnx:<model directory name>`
pub(super) fn backend_id(model_dir: &Path) -> String {
    let name = model_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    format!("onnx:{name}")
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
