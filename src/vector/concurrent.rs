//! Thread-safe handle around a [`VectorIndex`].
//!
//! Queries take a shared lock and run concurrently; training, adding,
//! probe changes and accelerator toggles take the exclusive lock. A handle
//! that has not been created or loaded yet rejects every operation with a
//! state error.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::vector::index::{IndexConfiguration, IndexStats, VectorIndex};
use crate::vector::types::{RangeSearchResult, VectorError, VectorId, VectorResult};

/// Cloneable single-writer / multi-reader index handle.
#[derive(Clone, Default)]
pub struct SharedVectorIndex {
    inner: Arc<RwLock<Option<VectorIndex>>>,
}

fn not_ready(operation: &'static str) -> VectorError {
    VectorError::State {
        operation,
        state: "uncreated".to_string(),
        suggestion: "Create the index or load it from an artifact first",
    }
}

impl SharedVectorIndex {
    /// A handle with no index behind it yet.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps an existing index.
    pub fn new(index: VectorIndex) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(index))),
        }
    }

    /// Creates a fresh index behind this handle, replacing any previous one.
    pub fn create(&self, config: IndexConfiguration) -> VectorResult<()> {
        let index = VectorIndex::create(config)?;
        *self.inner.write() = Some(index);
        Ok(())
    }

    /// Loads an artifact behind this handle, replacing any previous index.
    pub fn load(&self, path: impl AsRef<Path>) -> VectorResult<()> {
        let index = VectorIndex::load(path)?;
        *self.inner.write() = Some(index);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.inner.read().is_some()
    }

    /// Runs `f` with shared access to the index.
    pub fn read<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&VectorIndex) -> VectorResult<T>,
    ) -> VectorResult<T> {
        let guard = self.inner.read();
        let index = guard.as_ref().ok_or_else(|| not_ready(operation))?;
        f(index)
    }

    /// Runs `f` with exclusive access to the index.
    pub fn write<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut VectorIndex) -> VectorResult<T>,
    ) -> VectorResult<T> {
        let mut guard = self.inner.write();
        let index = guard.as_mut().ok_or_else(|| not_ready(operation))?;
        f(index)
    }

    pub fn train(&self, sample: &[Vec<f32>]) -> VectorResult<()> {
        self.write("train", |index| index.train(sample))
    }

    pub fn add(
        &self,
        vectors: &[Vec<f32>],
        ids: Option<&[VectorId]>,
    ) -> VectorResult<Vec<VectorId>> {
        self.write("add", |index| index.add(vectors, ids))
    }

    pub fn range_search(
        &self,
        queries: &[Vec<f32>],
        distance_threshold: f32,
    ) -> VectorResult<RangeSearchResult> {
        self.read("range_search", |index| index.range_search(queries, distance_threshold))
    }

    pub fn set_probe_count(&self, probe_count: usize) -> VectorResult<()> {
        self.write("set_probe_count", |index| index.set_probe_count(probe_count))
    }

    pub fn set_accelerator(&self, enabled: bool) -> VectorResult<()> {
        self.write("set_accelerator", |index| {
            index.set_accelerator(enabled);
            Ok(())
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> VectorResult<()> {
        self.read("save", |index| index.save(path))
    }

    pub fn stats(&self) -> VectorResult<IndexStats> {
        self.read("stats", |index| Ok(index.stats()))
    }

    pub fn len(&self) -> VectorResult<usize> {
        self.read("len", |index| Ok(index.len()))
    }

    pub fn is_trained(&self) -> VectorResult<bool> {
        self.read("is_trained", |index| Ok(index.is_trained()))
    }

    pub fn dimension(&self) -> VectorResult<usize> {
        self.read("dimension", |index| Ok(index.dimension()))
    }
}

impl std::fmt::Debug for SharedVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_read() {
            Some(guard) => match guard.as_ref() {
                Some(index) => write!(
                    f,
                    "SharedVectorIndex {{ kind: {}, count: {} }}",
                    index.kind(),
                    index.len()
                ),
                None => write!(f, "SharedVectorIndex {{ <uncreated> }}"),
            },
            None => write!(f, "SharedVectorIndex {{ <locked> }}"),
        }
    }
}
