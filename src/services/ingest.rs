//! Ingestion orchestrator.
//!
//! A run walks `Extracting → Chunking → Embedding → IndexBuilding →
//! Promoting` and ends `Idle` on success, `Failed` or `Cancelled` otherwise.
//! Per-document problems are recorded and the document skipped; embedding
//! and index failures abort the run and leave the active index alone.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use super::chunker::TextChunker;
use super::embedding::EmbeddingProvider;
use super::index::VectorIndex;
use super::loader::{DocumentSource, extract};
use super::state::EngineState;
use crate::error::{ChunkError, ExtractError, IngestError};
use crate::models::{Document, Passage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestPhase {
    Idle,
    Extracting,
    Chunking,
    Embedding,
    IndexBuilding,
    Promoting,
    Failed,
    Cancelled,
}

impl std::fmt::Display for IngestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IngestPhase::Idle => "idle",
            IngestPhase::Extracting => "extracting",
            IngestPhase::Chunking => "chunking",
            IngestPhase::Embedding => "embedding",
            IngestPhase::IndexBuilding => "index building",
            IngestPhase::Promoting => "promoting",
            IngestPhase::Failed => "failed",
            IngestPhase::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// A document skipped during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    pub document: String,
    pub phase: IngestPhase,
    pub reason: String,
}

#[derive(Debug)]
pub enum IngestOutcome {
    /// The new index is saved and active.
    Promoted { passages: usize, dimension: usize },
    /// The run aborted; the previous index is still active.
    Failed {
        phase: IngestPhase,
        error: IngestError,
    },
    /// Stopped on request; the previous index is still active.
    Cancelled,
}

#[derive(Debug)]
pub struct IngestReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub documents_total: usize,
    pub documents_ingested: usize,
    pub passages: usize,
    pub reused_vectors: usize,
    pub failures: Vec<DocumentFailure>,
    pub outcome: IngestOutcome,
}

impl IngestReport {
    fn new(documents_total: usize) -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            documents_total,
            documents_ingested: 0,
            passages: 0,
            reused_vectors: 0,
            failures: Vec::new(),
            outcome: IngestOutcome::Cancelled,
        }
    }

    pub fn is_promoted(&self) -> bool {
        matches!(self.outcome, IngestOutcome::Promoted { .. })
    }

    fn record(&mut self, document: &str, phase: IngestPhase, reason: impl ToString) {
        let reason = reason.to_string();
        tracing::warn!(document, %phase, "skipping document: {reason}");
        self.failures.push(DocumentFailure {
            document: document.to_string(),
            phase,
            reason,
        });
    }
}

/// Builds indexes from document sources and promotes them.
pub struct Ingestor {
    provider: EmbeddingProvider,
    state: Arc<EngineState>,
    chunker: TextChunker,
    index_dir: PathBuf,
    max_file_size: u64,
    cancel: Arc<AtomicBool>,
    phase: watch::Sender<IngestPhase>,
    running: Mutex<()>,
}

impl Ingestor {
    pub fn new(
        provider: EmbeddingProvider,
        state: Arc<EngineState>,
        chunker: TextChunker,
        index_dir: PathBuf,
        max_file_size: u64,
    ) -> Self {
        let (phase, _) = watch::channel(IngestPhase::Idle);
        Self {
            provider,
            state,
            chunker,
            index_dir,
            max_file_size,
            cancel: Arc::new(AtomicBool::new(false)),
            phase,
            running: Mutex::new(()),
        }
    }

    /// Observe phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<IngestPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> IngestPhase {
        *self.phase.borrow()
    }

    /// Ask the running (or next) ingestion to stop at its next checkpoint.
    pub fn cancel(&self) {
        tracing::info!("ingestion cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Run ingestion on a background task.
    pub fn spawn(self: &Arc<Self>, sources: Vec<DocumentSource>) -> JoinHandle<IngestReport> {
        let ingestor = Arc::clone(self);
        tokio::spawn(async move { ingestor.ingest(sources).await })
    }

    /// Ingest `sources` into a new index and promote it.
    pub async fn ingest(&self, sources: Vec<DocumentSource>) -> IngestReport {
        let mut report = IngestReport::new(sources.len());
        let Ok(_guard) = self.running.try_lock() else {
            report.outcome = IngestOutcome::Failed {
                phase: IngestPhase::Idle,
                error: IngestError::AlreadyRunning,
            };
            return report;
        };

        tracing::info!(documents = sources.len(), "ingestion started");
        let outcome = match self.run(sources, &mut report).await {
            Ok(outcome) => outcome,
            Err((phase, error)) => {
                tracing::warn!(%phase, "ingestion failed: {error}");
                IngestOutcome::Failed { phase, error }
            }
        };
        report.outcome = outcome;
        report.finished_at = Utc::now();

        let end = match report.outcome {
            IngestOutcome::Promoted { .. } => IngestPhase::Idle,
            IngestOutcome::Failed { .. } => IngestPhase::Failed,
            IngestOutcome::Cancelled => IngestPhase::Cancelled,
        };
        self.set_phase(end);
        self.cancel.store(false, Ordering::SeqCst);
        report
    }

    async fn run(
        &self,
        sources: Vec<DocumentSource>,
        report: &mut IngestReport,
    ) -> Result<IngestOutcome, (IngestPhase, IngestError)> {
        self.set_phase(IngestPhase::Extracting);
        let mut documents = Vec::with_capacity(sources.len());
        let mut seen = HashSet::new();
        for source in &sources {
            let id = source.id();
            if !seen.insert(id.clone()) {
                report.record(&id, IngestPhase::Extracting, ExtractError::Duplicate(id.clone()));
                continue;
            }
            match extract(source, self.max_file_size) {
                Ok(doc) => documents.push(doc),
                Err(e) => report.record(&id, IngestPhase::Extracting, e),
            }
            if self.cancelled() {
                return Ok(IngestOutcome::Cancelled);
            }
        }

        self.set_phase(IngestPhase::Chunking);
        let passages = self.chunk_documents(&documents, report);
        if self.cancelled() {
            return Ok(IngestOutcome::Cancelled);
        }
        report.passages = passages.len();

        self.set_phase(IngestPhase::Embedding);
        let Some(vectors) = self
            .embed_passages(&passages, report)
            .await
            .map_err(|e| (IngestPhase::Embedding, e))?
        else {
            return Ok(IngestOutcome::Cancelled);
        };

        self.set_phase(IngestPhase::IndexBuilding);
        let index = VectorIndex::build(self.provider.id(), vectors, passages)
            .map_err(|e| (IngestPhase::IndexBuilding, IngestError::Index(e)))?;
        let index = Arc::new(index);
        if self.cancelled() {
            return Ok(IngestOutcome::Cancelled);
        }

        self.set_phase(IngestPhase::Promoting);
        let to_save = Arc::clone(&index);
        let dir = self.index_dir.clone();
        tokio::task::spawn_blocking(move || to_save.save(&dir))
            .await
            .map_err(|e| {
                (
                    IngestPhase::Promoting,
                    IngestError::Task {
                        phase: IngestPhase::Promoting,
                        reason: e.to_string(),
                    },
                )
            })?
            .map_err(|e| (IngestPhase::Promoting, IngestError::Index(e)))?;

        let (passages, dimension) = (index.len(), index.dimension());
        self.state.promote(index).await;
        tracing::info!(
            documents = report.documents_ingested,
            passages,
            reused = report.reused_vectors,
            skipped = report.failures.len(),
            "ingestion complete"
        );
        Ok(IngestOutcome::Promoted {
            passages,
            dimension,
        })
    }

    fn chunk_documents(&self, documents: &[Document], report: &mut IngestReport) -> Vec<Passage> {
        let mut passages = Vec::new();
        for document in documents {
            let chunks = self.chunker.chunk_document(document);
            if chunks.is_empty() {
                report.record(&document.id, IngestPhase::Chunking, ChunkError::NoContent);
            } else {
                tracing::debug!(document = %document.id, passages = chunks.len(), "chunked");
                report.documents_ingested += 1;
                passages.extend(chunks);
            }
            if self.cancelled() {
                break;
            }
        }
        passages
    }

    /// Vectors for `passages` in order, or `None` when cancelled.
    ///
    /// Vectors already held by the active index are reused when it was built
    /// by the same embedder.
    async fn embed_passages(
        &self,
        passages: &[Passage],
        report: &mut IngestReport,
    ) -> Result<Option<Vec<Vec<f32>>>, IngestError> {
        let active = self.state.snapshot().await;
        let reusable = active.embedder_id() == Some(self.provider.id())
            && active.dimension() == self.provider.dimension();

        let mut vectors: Vec<Option<Vec<f32>>> = passages
            .iter()
            .map(|p| {
                if reusable {
                    active.vector_for(&p.chunk_id)
                } else {
                    None
                }
            })
            .collect();
        report.reused_vectors = vectors.iter().filter(|v| v.is_some()).count();

        let pending: Vec<usize> = (0..passages.len()).filter(|&i| vectors[i].is_none()).collect();
        for batch in pending.chunks(self.provider.batch_size()) {
            if self.cancelled() {
                return Ok(None);
            }
            let texts: Vec<String> = batch.iter().map(|&i| passages[i].content.clone()).collect();
            let embedded = self.provider.embed_batch(&texts).await?;
            for (&i, vector) in batch.iter().zip(embedded) {
                vectors[i] = Some(vector);
            }
        }

        Ok(Some(vectors.into_iter().flatten().collect()))
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: IngestPhase) {
        tracing::debug!(%phase, "ingestion phase");
        self.phase.send_replace(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::embedding::testing::{ScriptedBackend, provider, unavailable};
    use crate::services::embedding::EmbeddingBackend;

    struct Fixture {
        _dir: tempfile::TempDir,
        state: Arc<EngineState>,
        index_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let index_dir = dir.path().join("index");
        Fixture {
            _dir: dir,
            state: Arc::new(EngineState::default()),
            index_dir,
        }
    }

    fn ingestor(fixture: &Fixture, backend: Arc<dyn EmbeddingBackend>) -> Ingestor {
        Ingestor::new(
            provider(backend),
            fixture.state.clone(),
            TextChunker::with_sizes(800, 100),
            fixture.index_dir.clone(),
            1024 * 1024,
        )
    }

    fn library_doc() -> DocumentSource {
        DocumentSource::Inline(Document::with_pages(
            "guide.txt",
            vec![
                "Library opens at 8am.".to_string(),
                "Fines are $0.50/day.".to_string(),
            ],
        ))
    }

    async fn chunk_ids(state: &EngineState) -> HashSet<String> {
        state
            .snapshot()
            .await
            .passages()
            .iter()
            .map(|p| p.chunk_id.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_corrupted_document_is_skipped() {
        let fx = fixture();
        let ingestor = ingestor(&fx, Arc::new(ScriptedBackend::healthy(64)));
        let corrupt = DocumentSource::Inline(Document::new("broken.txt", "bad\0bytes"));

        let report = ingestor.ingest(vec![library_doc(), corrupt]).await;

        assert!(report.is_promoted());
        assert_eq!(report.documents_total, 2);
        assert_eq!(report.documents_ingested, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].document, "broken.txt");
        assert_eq!(report.failures[0].phase, IngestPhase::Extracting);

        let index = fx.state.snapshot().await;
        assert_eq!(index.len(), 2);
        assert!(index.passages().iter().all(|p| p.source == "guide.txt"));
        assert!(VectorIndex::exists(&fx.index_dir));
        assert_eq!(ingestor.phase(), IngestPhase::Idle);
    }

    #[tokio::test]
    async fn test_reingestion_is_idempotent_and_reuses_vectors() {
        let fx = fixture();
        let backend = Arc::new(ScriptedBackend::healthy(64));
        let ingestor = ingestor(&fx, backend.clone());

        let first = ingestor.ingest(vec![library_doc()]).await;
        assert!(first.is_promoted());
        assert_eq!(first.reused_vectors, 0);
        let ids = chunk_ids(&fx.state).await;
        let calls = backend.calls();

        let second = ingestor.ingest(vec![library_doc()]).await;
        assert!(second.is_promoted());
        assert_eq!(second.reused_vectors, 2);
        assert_eq!(backend.calls(), calls);
        assert_eq!(chunk_ids(&fx.state).await, ids);
        assert_eq!(fx.state.generation(), 2);
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_previous_index() {
        let fx = fixture();
        let healthy = ingestor(&fx, Arc::new(ScriptedBackend::healthy(64)));
        assert!(healthy.ingest(vec![library_doc()]).await.is_promoted());
        let before = chunk_ids(&fx.state).await;

        let failing = ingestor(&fx, Arc::new(ScriptedBackend::always_failing(64, unavailable)));
        let other = DocumentSource::Inline(Document::new("rules.txt", "Quiet study on floor three."));
        let report = failing.ingest(vec![other]).await;

        assert!(matches!(
            report.outcome,
            IngestOutcome::Failed {
                phase: IngestPhase::Embedding,
                error: IngestError::Embedding(_)
            }
        ));
        assert_eq!(chunk_ids(&fx.state).await, before);
        assert_eq!(failing.phase(), IngestPhase::Failed);
    }

    #[tokio::test]
    async fn test_duplicate_and_blank_documents() {
        let fx = fixture();
        let ingestor = ingestor(&fx, Arc::new(ScriptedBackend::healthy(64)));
        let blank = DocumentSource::Inline(Document::new("blank.txt", "   \n  "));

        let report = ingestor
            .ingest(vec![library_doc(), library_doc(), blank])
            .await;

        assert!(report.is_promoted());
        let phases: Vec<IngestPhase> = report.failures.iter().map(|f| f.phase).collect();
        assert_eq!(phases, vec![IngestPhase::Extracting, IngestPhase::Chunking]);
        assert!(report.failures[0].reason.contains("duplicate"));
    }

    #[tokio::test]
    async fn test_nothing_ingestible_fails_without_promotion() {
        let fx = fixture();
        let ingestor = ingestor(&fx, Arc::new(ScriptedBackend::healthy(64)));
        let report = ingestor
            .ingest(vec![DocumentSource::Inline(Document::new("x", "bad\0"))])
            .await;

        assert!(matches!(
            report.outcome,
            IngestOutcome::Failed {
                phase: IngestPhase::IndexBuilding,
                ..
            }
        ));
        assert!(!fx.state.snapshot().await.is_built());
    }

    #[tokio::test]
    async fn test_cancellation_leaves_state_untouched() {
        let fx = fixture();
        let ingestor = ingestor(&fx, Arc::new(ScriptedBackend::healthy(64)));
        let mut phases = ingestor.subscribe();

        ingestor.cancel();
        let report = ingestor.ingest(vec![library_doc()]).await;
        assert!(matches!(report.outcome, IngestOutcome::Cancelled));
        assert!(!fx.state.snapshot().await.is_built());
        assert_eq!(*phases.borrow_and_update(), IngestPhase::Cancelled);

        // The request is consumed by the run it stopped
        let report = ingestor.ingest(vec![library_doc()]).await;
        assert!(report.is_promoted());
    }

    #[tokio::test]
    async fn test_concurrent_ingestion_is_rejected() {
        let fx = fixture();
        let ingestor = ingestor(&fx, Arc::new(ScriptedBackend::healthy(64)));

        let _held = ingestor.running.try_lock().unwrap();
        let report = ingestor.ingest(vec![library_doc()]).await;
        assert!(matches!(
            report.outcome,
            IngestOutcome::Failed {
                error: IngestError::AlreadyRunning,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_spawned_ingestion() {
        let fx = fixture();
        let ingestor = Arc::new(ingestor(&fx, Arc::new(ScriptedBackend::healthy(64))));
        let report = ingestor.spawn(vec![library_doc()]).await.unwrap();
        assert!(report.is_promoted());
        assert!(fx.state.snapshot().await.is_built());
    }
}
