//! Exact nearest-neighbour index over passage vectors.
//!
//! Vectors live in one contiguous row-major matrix. Search is a full
//! squared-L2 scan, which is exact and fast enough for corpora of a few
//! hundred thousand passages.
//!
//! On disk an index is a directory:
//!
//! - `manifest.json`: format version, embedder id, dimension, count, build
//!   time and the SHA-256 of `vectors.bin`
//! - `vectors.bin`: magic, `u32` LE dimension, `u64` LE count, then `f32` LE
//!   rows
//! - `passages.json`: passages in row order

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;
use crate::models::{IndexStats, Passage, SearchResult};
use crate::utils::file::calculate_bytes_checksum;

const FORMAT_VERSION: u32 = 1;
const VECTORS_MAGIC: &[u8; 8] = b"DRAGVEC1";
const HEADER_LEN: usize = 8 + 4 + 8;

const MANIFEST_FILE: &str = "manifest.json";
const VECTORS_FILE: &str = "vectors.bin";
const PASSAGES_FILE: &str = "passages.json";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    format_version: u32,
    embedder_id: String,
    dimension: usize,
    count: usize,
    built_at: DateTime<Utc>,
    vectors_sha256: String,
}

/// One immutable corpus snapshot.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    embedder_id: Option<String>,
    vectors: Array2<f32>,
    passages: Vec<Passage>,
    rows_by_chunk: HashMap<String, usize>,
    built_at: Option<DateTime<Utc>>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::empty()
    }
}

impl VectorIndex {
    /// The "nothing indexed" index.
    pub fn empty() -> Self {
        Self {
            embedder_id: None,
            vectors: Array2::zeros((0, 0)),
            passages: Vec::new(),
            rows_by_chunk: HashMap::new(),
            built_at: None,
        }
    }

    /// Build an index from parallel vectors and passages. All-or-nothing.
    pub fn build(
        embedder_id: impl Into<String>,
        vectors: Vec<Vec<f32>>,
        passages: Vec<Passage>,
    ) -> Result<Self, IndexError> {
        Self::assemble(embedder_id.into(), vectors, passages, Utc::now())
    }

    fn assemble(
        embedder_id: String,
        vectors: Vec<Vec<f32>>,
        passages: Vec<Passage>,
        built_at: DateTime<Utc>,
    ) -> Result<Self, IndexError> {
        if passages.is_empty() {
            return Err(IndexError::EmptyCorpus);
        }
        if vectors.len() != passages.len() {
            return Err(IndexError::CountMismatch {
                vectors: vectors.len(),
                passages: passages.len(),
            });
        }

        let dimension = vectors[0].len();
        let mut matrix = Array2::zeros((passages.len(), dimension));
        for (row, vector) in vectors.iter().enumerate() {
            // Zero-width rows cannot be compared
            if vector.len() != dimension || vector.is_empty() {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension.max(1),
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(IndexError::NonFiniteVector { row });
            }
            matrix.row_mut(row).assign(&ArrayView1::from(vector.as_slice()));
        }

        let rows_by_chunk = passages
            .iter()
            .enumerate()
            .map(|(row, p)| (p.chunk_id.clone(), row))
            .collect();

        Ok(Self {
            embedder_id: Some(embedder_id),
            vectors: matrix,
            passages,
            rows_by_chunk,
            built_at: Some(built_at),
        })
    }

    pub fn is_built(&self) -> bool {
        !self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Vector width; zero for an unbuilt index.
    pub fn dimension(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn embedder_id(&self) -> Option<&str> {
        self.embedder_id.as_deref()
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    /// Stored vector of a passage, if this index holds it.
    pub fn vector_for(&self, chunk_id: &str) -> Option<Vec<f32>> {
        self.rows_by_chunk
            .get(chunk_id)
            .map(|&row| self.vectors.row(row).to_vec())
    }

    /// The `k` nearest passages, closest first.
    ///
    /// Ties keep insertion order. An unbuilt index returns no results.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        if !self.is_built() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }

        let query = ArrayView1::from(query);
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .rows()
            .into_iter()
            .enumerate()
            .map(|(row, v)| {
                let diff = &v - &query;
                (row, diff.dot(&diff))
            })
            .collect();
        // Stable sort: equal distances stay in row order
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(i, (row, distance))| SearchResult {
                passage: self.passages[row].clone(),
                score: 1.0 / (1.0 + distance),
                rank: i as u32 + 1,
            })
            .collect())
    }

    pub fn stats(&self) -> IndexStats {
        let documents: HashSet<&str> = self.passages.iter().map(|p| p.source.as_str()).collect();
        IndexStats {
            built: self.is_built(),
            passages: self.passages.len() as u64,
            documents: documents.len() as u64,
            dimension: self.dimension() as u32,
            embedder_id: self.embedder_id.clone(),
            built_at: self.built_at.map(|t| t.to_rfc3339()),
        }
    }

    /// Whether `dir` holds a persisted index.
    pub fn exists(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).is_file()
    }

    /// Persist to `dir`, replacing any previous index there.
    ///
    /// Files are written to a sibling staging directory which is then
    /// renamed into place.
    pub fn save(&self, dir: &Path) -> Result<(), IndexError> {
        let (Some(embedder_id), Some(built_at)) = (&self.embedder_id, self.built_at) else {
            return Err(IndexError::EmptyCorpus);
        };

        let staging = sibling(dir, "staging");
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let vectors = self.encode_vectors();
        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            embedder_id: embedder_id.clone(),
            dimension: self.dimension(),
            count: self.len(),
            built_at,
            vectors_sha256: calculate_bytes_checksum(&vectors),
        };
        fs::write(staging.join(VECTORS_FILE), &vectors)?;
        fs::write(
            staging.join(PASSAGES_FILE),
            serde_json::to_vec(&self.passages)?,
        )?;
        // Manifest last: a staging dir without one is never loadable
        fs::write(
            staging.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest)?,
        )?;

        replace_dir(&staging, dir, |from, to| fs::rename(from, to))?;

        tracing::info!(
            path = %dir.display(),
            passages = self.len(),
            dimension = self.dimension(),
            "index saved"
        );
        Ok(())
    }

    /// Put back an index left aside by a save that never finished.
    ///
    /// Returns true when `dir` had no index and the previous one was restored.
    pub fn recover(dir: &Path) -> Result<bool, IndexError> {
        let previous = sibling(dir, "previous");
        if Self::exists(dir) || !Self::exists(&previous) {
            return Ok(false);
        }
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        fs::rename(&previous, dir)?;
        tracing::warn!(path = %dir.display(), "restored index from interrupted save");
        Ok(true)
    }

    /// Load and validate a persisted index.
    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let corrupt = |reason: String| IndexError::Corrupt {
            path: dir.to_path_buf(),
            reason,
        };

        let manifest: Manifest = read_json(&dir.join(MANIFEST_FILE)).map_err(&corrupt)?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                manifest.format_version
            )));
        }

        let bytes = fs::read(dir.join(VECTORS_FILE))
            .map_err(|e| corrupt(format!("{VECTORS_FILE}: {e}")))?;
        if calculate_bytes_checksum(&bytes) != manifest.vectors_sha256 {
            return Err(corrupt(format!("{VECTORS_FILE}: checksum mismatch")));
        }
        let vectors = decode_vectors(&bytes, manifest.dimension, manifest.count).map_err(&corrupt)?;

        let passages: Vec<Passage> = read_json(&dir.join(PASSAGES_FILE)).map_err(&corrupt)?;
        if passages.len() != manifest.count {
            return Err(corrupt(format!(
                "manifest lists {} passages, found {}",
                manifest.count,
                passages.len()
            )));
        }

        let index = Self::assemble(manifest.embedder_id, vectors, passages, manifest.built_at)
            .map_err(|e| corrupt(e.to_string()))?;
        tracing::info!(
            path = %dir.display(),
            passages = index.len(),
            dimension = index.dimension(),
            "index loaded"
        );
        Ok(index)
    }

    fn encode_vectors(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        bytes.extend_from_slice(VECTORS_MAGIC);
        bytes.extend_from_slice(&(self.dimension() as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        for x in self.vectors.iter() {
            bytes.extend_from_slice(&x.to_le_bytes());
        }
        bytes
    }
}

fn decode_vectors(bytes: &[u8], dimension: usize, count: usize) -> Result<Vec<Vec<f32>>, String> {
    if bytes.len() < HEADER_LEN || &bytes[..8] != VECTORS_MAGIC {
        return Err(format!("{VECTORS_FILE}: bad header"));
    }
    let mut dim_bytes = [0u8; 4];
    dim_bytes.copy_from_slice(&bytes[8..12]);
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&bytes[12..20]);
    let file_dimension = u32::from_le_bytes(dim_bytes) as usize;
    let file_count = u64::from_le_bytes(count_bytes) as usize;

    if file_dimension != dimension || file_count != count {
        return Err(format!(
            "{VECTORS_FILE}: header says {file_count}x{file_dimension}, manifest says {count}x{dimension}"
        ));
    }
    let data = &bytes[HEADER_LEN..];
    let expected = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| format!("{VECTORS_FILE}: size {count}x{dimension} overflows"))?;
    if data.len() != expected {
        return Err(format!("{VECTORS_FILE}: truncated data"));
    }

    let values: Vec<f32> = data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok(values
        .chunks(dimension.max(1))
        .map(<[f32]>::to_vec)
        .collect())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bytes = fs::read(path).map_err(|e| format!("{name}: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("{name}: {e}"))
}

/// Swap `staging` into `dir`.
///
/// The old `dir` is parked beside it until the swap succeeds and is moved
/// back when it does not, so `dir` never ends up empty.
fn replace_dir(
    staging: &Path,
    dir: &Path,
    rename: impl Fn(&Path, &Path) -> std::io::Result<()>,
) -> std::io::Result<()> {
    let previous = sibling(dir, "previous");
    if previous.exists() {
        fs::remove_dir_all(&previous)?;
    }
    let parked = dir.exists();
    if parked {
        rename(dir, &previous)?;
    }
    if let Err(e) = rename(staging, dir) {
        if parked && let Err(restore) = rename(&previous, dir) {
            tracing::error!(path = %dir.display(), "failed to restore previous index: {restore}");
        }
        return Err(e);
    }
    if parked {
        fs::remove_dir_all(&previous)?;
    }
    Ok(())
}

fn sibling(dir: &Path, suffix: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    dir.with_file_name(format!(".{name}.{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(source: &str, idx: u32, content: &str) -> Passage {
        Passage::new(source, None, None, idx, content.to_string())
    }

    fn sample_index() -> VectorIndex {
        VectorIndex::build(
            "test:d3",
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.0, 0.0, 1.0],
                vec![0.7, 0.7, 0.0],
            ],
            vec![
                passage("a.txt", 0, "alpha"),
                passage("a.txt", 1, "beta"),
                passage("b.txt", 0, "gamma"),
                passage("b.txt", 1, "delta"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = sample_index();
        let results = index.search(&[1.0, 0.1, 0.0], 2).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].passage.content, "alpha");
        assert_eq!(results[1].passage.content, "delta");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
        assert!(results[0].score > results[1].score);
        assert!(results[0].score <= 1.0);
    }

    #[test]
    fn test_exact_match_scores_one() {
        let index = sample_index();
        let results = index.search(&[0.0, 0.0, 1.0], 1).unwrap();
        assert_eq!(results[0].passage.content, "gamma");
        assert_eq!(results[0].score, 1.0);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = VectorIndex::build(
            "test:d2",
            vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]],
            vec![
                passage("a", 0, "first"),
                passage("a", 1, "second"),
                passage("a", 2, "third"),
            ],
        )
        .unwrap();
        let order: Vec<String> = index
            .search(&[0.0, 1.0], 3)
            .unwrap()
            .into_iter()
            .map(|r| r.passage.content)
            .collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_k_larger_than_corpus() {
        let index = sample_index();
        assert_eq!(index.search(&[0.0, 0.0, 0.0], 50).unwrap().len(), 4);
        assert!(index.search(&[0.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_empty_index_search() {
        let index = VectorIndex::empty();
        assert!(!index.is_built());
        assert!(index.search(&[1.0, 2.0], 5).unwrap().is_empty());
        assert!(!index.stats().built);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let err = sample_index().search(&[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_build_rejects_bad_input() {
        assert!(matches!(
            VectorIndex::build("x", vec![], vec![]),
            Err(IndexError::EmptyCorpus)
        ));
        assert!(matches!(
            VectorIndex::build("x", vec![vec![1.0]], vec![passage("a", 0, "a"), passage("a", 1, "b")]),
            Err(IndexError::CountMismatch { vectors: 1, passages: 2 })
        ));
        assert!(matches!(
            VectorIndex::build(
                "x",
                vec![vec![1.0, 2.0], vec![1.0]],
                vec![passage("a", 0, "a"), passage("a", 1, "b")]
            ),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(matches!(
            VectorIndex::build(
                "x",
                vec![vec![1.0], vec![f32::NAN]],
                vec![passage("a", 0, "a"), passage("a", 1, "b")]
            ),
            Err(IndexError::NonFiniteVector { row: 1 })
        ));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        let index = sample_index();
        index.save(&path).unwrap();
        assert!(VectorIndex::exists(&path));

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.embedder_id(), Some("test:d3"));
        assert_eq!(loaded.built_at(), index.built_at());
        for probe in [[1.0, 0.1, 0.0], [0.2, 0.3, 0.9], [0.5, 0.5, 0.5]] {
            assert_eq!(
                index.search(&probe, 4).unwrap(),
                loaded.search(&probe, 4).unwrap()
            );
        }
    }

    #[test]
    fn test_save_replaces_previous_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        sample_index().save(&path).unwrap();

        let smaller =
            VectorIndex::build("test:d3", vec![vec![1.0, 0.0, 0.0]], vec![passage("c", 0, "only")])
                .unwrap();
        smaller.save(&path).unwrap();

        assert_eq!(VectorIndex::load(&path).unwrap().len(), 1);
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_load_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        sample_index().save(&path).unwrap();

        let vectors = path.join(VECTORS_FILE);
        let mut bytes = fs::read(&vectors).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&vectors, bytes).unwrap();

        assert!(matches!(
            VectorIndex::load(&path),
            Err(IndexError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_failed_swap_keeps_serving_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        sample_index().save(&path).unwrap();

        let staging = sibling(&path, "staging");
        fs::create_dir_all(&staging).unwrap();
        let err = replace_dir(&staging, &path, |from, to| {
            if from == staging.as_path() {
                Err(std::io::Error::other("disk full"))
            } else {
                fs::rename(from, to)
            }
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "disk full");

        assert_eq!(VectorIndex::load(&path).unwrap().len(), 4);
        assert!(!sibling(&path, "previous").exists());
    }

    #[test]
    fn test_recover_interrupted_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        sample_index().save(&path).unwrap();
        assert!(!VectorIndex::recover(&path).unwrap());

        // Old index parked, new one not yet in place
        fs::rename(&path, sibling(&path, "previous")).unwrap();
        assert!(!VectorIndex::exists(&path));

        assert!(VectorIndex::recover(&path).unwrap());
        assert_eq!(VectorIndex::load(&path).unwrap().len(), 4);
        assert!(!sibling(&path, "previous").exists());
    }

    #[test]
    fn test_decode_rejects_overflowing_header() {
        let mut bytes = VECTORS_MAGIC.to_vec();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        let err = decode_vectors(&bytes, 2, u64::MAX as usize).unwrap_err();
        assert!(err.contains("overflows"));
    }

    #[test]
    fn test_load_missing_directory_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        assert!(!VectorIndex::exists(&path));
        assert!(matches!(
            VectorIndex::load(&path),
            Err(IndexError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_vector_for_and_stats() {
        let index = sample_index();
        let id = index.passages()[1].chunk_id.clone();
        assert_eq!(index.vector_for(&id), Some(vec![0.0, 1.0, 0.0]));
        assert_eq!(index.vector_for("missing"), None);

        let stats = index.stats();
        assert!(stats.built);
        assert_eq!(stats.passages, 4);
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.dimension, 3);
    }
}
