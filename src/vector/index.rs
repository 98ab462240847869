//! The clone index: configuration, lifecycle and threshold search.
//!
//! A [`VectorIndex`] owns one backend and walks it through a forward-only
//! lifecycle:
//!
//! ```text
//! create ──> Created ──train──> Trained ──add──> Populated
//!                                  ^                 │
//!                                  └── exact backend starts here
//! ```
//!
//! Every vector is normalized to unit length on a private copy before it
//! reaches the backend, which is what makes L2 range search equivalent to a
//! cosine-similarity threshold.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::vector::backend::{Backend, FlatIndex, IvfFlatIndex, IvfPqIndex, VectorBackend};
use crate::vector::clustering::{DEFAULT_MAX_ITERATIONS, KMeansParams};
use crate::vector::metric::ZERO_VECTOR_DISTANCE;
use crate::vector::normalize::{is_zero, normalize_batch, normalized};
use crate::vector::quantizer::ProductQuantizer;
use crate::vector::storage::{IndexArtifact, read_artifact, write_artifact};
use crate::vector::types::{
    IndexKind, IndexState, Neighbor, RangeSearchResult, VECTOR_DIMENSION_768, VectorDimension,
    VectorError, VectorId, VectorResult,
};

fn default_dimension() -> usize {
    VECTOR_DIMENSION_768
}

fn default_cluster_count() -> usize {
    4096
}

fn default_subvector_count() -> usize {
    64
}

fn default_bits_per_code() -> u8 {
    8
}

fn default_probe_count() -> usize {
    16
}

fn default_kmeans_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_seed() -> u64 {
    42
}

/// Shape and tuning of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct IndexConfiguration {
    /// Embedding dimension
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Backend flavour (`"Flat"`, `"IVF,Flat"` or `"IVF,PQ"`)
    #[serde(default)]
    pub kind: IndexKind,

    /// Number of k-means clusters (inverted lists)
    #[serde(default = "default_cluster_count")]
    pub cluster_count: usize,

    /// Product quantizer sub-vectors; must divide `dimension`
    #[serde(default = "default_subvector_count")]
    pub subvector_count: usize,

    /// Bits per sub-vector code, 1 to 8
    #[serde(default = "default_bits_per_code")]
    pub bits_per_code: u8,

    /// Clusters probed per query
    #[serde(default = "default_probe_count")]
    pub probe_count: usize,

    /// Request accelerator residency (no accelerator backend is compiled in)
    #[serde(default)]
    pub use_accelerator: bool,

    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,

    /// Seed for k-means initialization and training sub-sampling
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for IndexConfiguration {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            kind: IndexKind::default(),
            cluster_count: default_cluster_count(),
            subvector_count: default_subvector_count(),
            bits_per_code: default_bits_per_code(),
            probe_count: default_probe_count(),
            use_accelerator: false,
            kmeans_iterations: default_kmeans_iterations(),
            seed: default_seed(),
        }
    }
}

impl IndexConfiguration {
    /// An exact index of the given dimension.
    pub fn exact(dimension: usize) -> Self {
        Self {
            dimension,
            kind: IndexKind::Exact,
            ..Self::default()
        }
    }

    /// A clustered-exact index with `cluster_count` lists.
    pub fn clustered_exact(dimension: usize, cluster_count: usize) -> Self {
        Self {
            dimension,
            kind: IndexKind::ClusteredExact,
            cluster_count,
            ..Self::default()
        }
    }

    /// A clustered-quantized index.
    pub fn clustered_quantized(
        dimension: usize,
        cluster_count: usize,
        subvector_count: usize,
        bits_per_code: u8,
    ) -> Self {
        Self {
            dimension,
            kind: IndexKind::ClusteredQuantized,
            cluster_count,
            subvector_count,
            bits_per_code,
            ..Self::default()
        }
    }

    /// Checks that the combination of fields can be built.
    pub fn validate(&self) -> VectorResult<()> {
        VectorDimension::new(self.dimension).map_err(|_| VectorError::Configuration {
            reason: "dimension must be greater than zero".to_string(),
        })?;

        if self.kind.is_clustered() {
            if self.cluster_count == 0 {
                return Err(VectorError::Configuration {
                    reason: "cluster_count must be at least 1".to_string(),
                });
            }
            if self.probe_count == 0 {
                return Err(VectorError::Configuration {
                    reason: "probe_count must be at least 1".to_string(),
                });
            }
        }

        if self.kind.is_quantized() {
            ProductQuantizer::validate_shape(
                self.dimension,
                self.subvector_count,
                self.bits_per_code,
            )?;
        }

        Ok(())
    }

    fn kmeans_params(&self) -> KMeansParams {
        KMeansParams {
            max_iterations: self.kmeans_iterations,
            seed: self.seed,
        }
    }
}

/// Diagnostics about an index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub kind: IndexKind,
    pub state: IndexState,
    pub dimension: usize,
    pub count: usize,
    pub is_trained: bool,
    pub cluster_count: Option<usize>,
    pub probe_count: Option<usize>,
    pub subvector_count: Option<usize>,
    pub bits_per_code: Option<u8>,
    pub use_accelerator: bool,
    pub bytes_per_vector: usize,
}

/// A vector index answering cosine-threshold queries.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    config: IndexConfiguration,
    state: IndexState,
    backend: Backend,
    /// Next auto-assigned ID; above every ID ever stored
    next_id: i64,
    /// Stored vectors with zero norm, similarity 0 to everything
    zero_ids: BTreeSet<VectorId>,
}

impl VectorIndex {
    /// Validates `config` and allocates an empty backend.
    ///
    /// The exact backend needs no training and starts in
    /// [`IndexState::Trained`].
    pub fn create(config: IndexConfiguration) -> VectorResult<Self> {
        config.validate()?;

        let mut config = config;
        if config.use_accelerator {
            tracing::warn!(
                "accelerator requested but none is available; index stays host-resident"
            );
            config.use_accelerator = false;
        }

        let (backend, state) = match config.kind {
            IndexKind::Exact => (
                Backend::Exact(FlatIndex::new(config.dimension)),
                IndexState::Trained,
            ),
            IndexKind::ClusteredExact => (
                Backend::ClusteredExact(IvfFlatIndex::new(config.dimension, config.cluster_count)),
                IndexState::Created,
            ),
            IndexKind::ClusteredQuantized => (
                Backend::ClusteredQuantized(IvfPqIndex::new(
                    config.dimension,
                    config.cluster_count,
                    config.subvector_count,
                    config.bits_per_code,
                )),
                IndexState::Created,
            ),
        };

        tracing::info!(
            kind = %config.kind,
            dimension = config.dimension,
            cluster_count = config.cluster_count,
            "created vector index"
        );

        Ok(Self {
            config,
            state,
            backend,
            next_id: 0,
            zero_ids: BTreeSet::new(),
        })
    }

    /// Recommended cluster count for `vector_count` vectors: `4·√n`, at
    /// least 1 and at most `n`.
    #[must_use]
    pub fn suggest_cluster_count(vector_count: usize) -> usize {
        let suggestion = (4.0 * (vector_count as f64).sqrt()).round() as usize;
        suggestion.clamp(1, vector_count.max(1))
    }

    fn inner(&self) -> &dyn VectorBackend {
        self.backend.as_backend()
    }

    pub fn config(&self) -> &IndexConfiguration {
        &self.config
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    pub fn kind(&self) -> IndexKind {
        self.config.kind
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn is_trained(&self) -> bool {
        self.state >= IndexState::Trained
    }

    pub fn len(&self) -> usize {
        self.inner().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner().is_empty()
    }

    pub fn contains(&self, id: VectorId) -> bool {
        self.inner().contains(id)
    }

    /// The ID the next auto-assigned vector receives.
    pub fn next_id(&self) -> VectorId {
        VectorId::new(self.next_id)
    }

    fn validate_vectors(&self, vectors: &[Vec<f32>]) -> VectorResult<()> {
        VectorDimension::new(self.config.dimension)?.validate_batch(vectors)
    }

    /// Learns centroids (and codebooks) from a representative sample.
    ///
    /// Training an already trained index is a no-op.
    pub fn train(&mut self, sample: &[Vec<f32>]) -> VectorResult<()> {
        if self.is_trained() {
            tracing::warn!(kind = %self.config.kind, "index is already trained; skipping training");
            return Ok(());
        }
        if sample.is_empty() {
            return Err(VectorError::ClusteringFailed(
                "training sample is empty".to_string(),
            ));
        }
        self.validate_vectors(sample)?;
        if sample.len() < self.config.cluster_count {
            return Err(VectorError::ClusteringFailed(format!(
                "training sample of {} vectors is smaller than cluster_count {}",
                sample.len(),
                self.config.cluster_count
            )));
        }

        let started = Instant::now();
        let sample = normalize_batch(sample);
        let params = self.config.kmeans_params();
        self.backend.as_backend_mut().train(&sample, &params)?;
        self.state = IndexState::Trained;

        tracing::info!(
            kind = %self.config.kind,
            sample_size = sample.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "trained vector index"
        );
        Ok(())
    }

    /// Adds vectors, assigning sequential IDs when `ids` is `None`. Returns
    /// the IDs used.
    ///
    /// Auto-assigned IDs start above every ID the index has stored, so they
    /// never replace an existing vector. An explicit ID that is already
    /// stored is replaced.
    pub fn add(
        &mut self,
        vectors: &[Vec<f32>],
        ids: Option<&[VectorId]>,
    ) -> VectorResult<Vec<VectorId>> {
        if !self.is_trained() {
            return Err(VectorError::State {
                operation: "add",
                state: self.state.to_string(),
                suggestion: "Call train() with a representative sample first",
            });
        }

        let ids: Vec<VectorId> = match ids {
            Some(ids) => {
                if ids.len() != vectors.len() {
                    return Err(VectorError::LengthMismatch {
                        left_name: "vectors",
                        left: vectors.len(),
                        right_name: "ids",
                        right: ids.len(),
                    });
                }
                ids.to_vec()
            }
            None => {
                let start = self.next_id;
                (start..start + vectors.len() as i64).map(VectorId::new).collect()
            }
        };

        if vectors.is_empty() {
            return Ok(ids);
        }
        self.validate_vectors(vectors)?;

        let normalized_vectors = normalize_batch(vectors);
        self.backend.as_backend_mut().add(&normalized_vectors, &ids)?;
        self.state = IndexState::Populated;

        for (vector, &id) in vectors.iter().zip(&ids) {
            if is_zero(vector) {
                self.zero_ids.insert(id);
            } else {
                self.zero_ids.remove(&id);
            }
        }
        if let Some(max) = ids.iter().max() {
            self.next_id = self.next_id.max(max.get().saturating_add(1));
        }

        tracing::debug!(added = ids.len(), total = self.len(), "added vectors to index");
        Ok(ids)
    }

    /// Finds every stored vector within `distance_threshold` of each query.
    ///
    /// Hits of each query are sorted by distance, then by ID. A zero vector,
    /// stored or queried, sits at [`ZERO_VECTOR_DISTANCE`] from everything.
    pub fn range_search(
        &self,
        queries: &[Vec<f32>],
        distance_threshold: f32,
    ) -> VectorResult<RangeSearchResult> {
        if !distance_threshold.is_finite() || distance_threshold < 0.0 {
            return Err(VectorError::InvalidDistance {
                value: distance_threshold,
            });
        }
        self.validate_vectors(queries)?;

        let probe_count = self.effective_probe_count();
        let backend = self.inner();
        let per_query: Vec<Vec<Neighbor>> = queries
            .par_iter()
            .map(|query| {
                let mut hits = self.search_one(backend, query, distance_threshold, probe_count);
                hits.sort_by(|a, b| {
                    a.distance
                        .total_cmp(&b.distance)
                        .then_with(|| a.id.cmp(&b.id))
                });
                hits
            })
            .collect();

        let result = RangeSearchResult::from_per_query(per_query);
        tracing::debug!(
            queries = queries.len(),
            hits = result.total_hits(),
            distance_threshold,
            probe_count,
            "range search complete"
        );
        Ok(result)
    }

    fn search_one(
        &self,
        backend: &dyn VectorBackend,
        query: &[f32],
        radius: f32,
        probe_count: usize,
    ) -> Vec<Neighbor> {
        let reaches_zero = radius >= ZERO_VECTOR_DISTANCE;
        let at_zero_distance = |id: VectorId| Neighbor {
            id,
            distance: ZERO_VECTOR_DISTANCE,
        };

        if is_zero(query) {
            return if reaches_zero {
                backend.ids().into_iter().map(at_zero_distance).collect()
            } else {
                Vec::new()
            };
        }

        let mut hits = backend.search(&normalized(query), radius, probe_count);
        if !self.zero_ids.is_empty() {
            hits.retain(|hit| !self.zero_ids.contains(&hit.id));
            if reaches_zero {
                hits.extend(self.zero_ids.iter().copied().map(at_zero_distance));
            }
        }
        hits
    }

    fn effective_probe_count(&self) -> usize {
        self.config.probe_count.clamp(1, self.config.cluster_count.max(1))
    }

    /// Sets how many clusters each query probes.
    pub fn set_probe_count(&mut self, probe_count: usize) -> VectorResult<()> {
        if probe_count == 0 {
            return Err(VectorError::InvalidProbeCount { value: probe_count });
        }
        if !self.config.kind.is_clustered() {
            tracing::warn!(probe_count, "probe count has no effect on an exact index");
            return Ok(());
        }
        if probe_count > self.config.cluster_count {
            tracing::debug!(
                probe_count,
                cluster_count = self.config.cluster_count,
                "probe count exceeds cluster count; every cluster will be probed"
            );
        }
        self.config.probe_count = probe_count;
        Ok(())
    }

    /// Toggles accelerator residency.
    ///
    /// No accelerator backend is available, so enabling it only logs a
    /// warning; the index keeps answering queries on the host.
    pub fn set_accelerator(&mut self, enabled: bool) {
        if enabled {
            tracing::warn!(
                "accelerator requested but none is available; index stays host-resident"
            );
        }
        self.config.use_accelerator = false;
    }

    /// Writes the index to a single artifact file.
    pub fn save(&self, path: impl AsRef<Path>) -> VectorResult<()> {
        let path = path.as_ref();
        let artifact = IndexArtifact {
            config: self.config.clone(),
            state: self.state,
            backend: self.backend.clone(),
            next_id: self.next_id,
            zero_ids: self.zero_ids.clone(),
        };
        let bytes = write_artifact(path, &artifact)?;
        tracing::info!(path = %path.display(), count = self.len(), bytes, "saved vector index");
        Ok(())
    }

    /// Reads an index previously written by [`VectorIndex::save`].
    pub fn load(path: impl AsRef<Path>) -> VectorResult<Self> {
        let path = path.as_ref();
        let artifact = read_artifact(path)?;
        artifact.config.validate()?;
        let index = Self {
            config: artifact.config,
            state: artifact.state,
            backend: artifact.backend,
            next_id: artifact.next_id,
            zero_ids: artifact.zero_ids,
        };
        tracing::info!(
            path = %path.display(),
            kind = %index.config.kind,
            count = index.len(),
            "loaded vector index"
        );
        Ok(index)
    }

    pub fn stats(&self) -> IndexStats {
        let clustered = self.config.kind.is_clustered();
        let quantized = self.config.kind.is_quantized();
        IndexStats {
            kind: self.config.kind,
            state: self.state,
            dimension: self.config.dimension,
            count: self.len(),
            is_trained: self.is_trained(),
            cluster_count: clustered.then_some(self.config.cluster_count),
            probe_count: clustered.then_some(self.config.probe_count),
            subvector_count: quantized.then_some(self.config.subvector_count),
            bits_per_code: quantized.then_some(self.config.bits_per_code),
            use_accelerator: self.config.use_accelerator,
            bytes_per_vector: self.inner().bytes_per_vector(),
        }
    }
}
