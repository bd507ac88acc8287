//! Process-wide holder of the active index.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use super::index::VectorIndex;
use crate::models::IndexStats;

/// Owns the index that queries are served from.
///
/// The lock is held only long enough to clone or swap the `Arc`, so a
/// request keeps using the snapshot it took even if a promotion happens
/// meanwhile.
#[derive(Debug)]
pub struct EngineState {
    active: RwLock<Arc<VectorIndex>>,
    generation: AtomicU64,
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new(VectorIndex::empty())
    }
}

impl EngineState {
    pub fn new(index: VectorIndex) -> Self {
        Self {
            active: RwLock::new(Arc::new(index)),
            generation: AtomicU64::new(0),
        }
    }

    /// Start from the index persisted in `dir`.
    ///
    /// An index left aside by an interrupted save is restored first. A
    /// missing or unreadable index yields the empty state.
    pub fn load_or_empty(dir: &Path) -> Self {
        if let Err(e) = VectorIndex::recover(dir) {
            tracing::warn!(path = %dir.display(), "could not restore previous index: {e}");
        }
        if !VectorIndex::exists(dir) {
            tracing::info!(path = %dir.display(), "no persisted index, starting empty");
            return Self::default();
        }
        match VectorIndex::load(dir) {
            Ok(index) => Self::new(index),
            Err(e) => {
                tracing::warn!(path = %dir.display(), "ignoring persisted index: {e}");
                Self::default()
            }
        }
    }

    /// The current index.
    pub async fn snapshot(&self) -> Arc<VectorIndex> {
        Arc::clone(&*self.active.read().await)
    }

    /// Replace the active index, returning the one it replaced.
    pub async fn promote(&self, index: impl Into<Arc<VectorIndex>>) -> Arc<VectorIndex> {
        let next = index.into();
        let previous = {
            let mut active = self.active.write().await;
            std::mem::replace(&mut *active, next)
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(generation, "index promoted");
        previous
    }

    /// Number of promotions since startup.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> IndexStats {
        self.snapshot().await.stats()
    }
}
