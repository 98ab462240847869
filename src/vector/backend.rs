//! Storage and search backends behind [`crate::vector::VectorIndex`].
//!
//! Three backends share one contract, [`VectorBackend`]:
//!
//! - [`FlatIndex`]: every vector in one list, searched exhaustively.
//! - [`IvfFlatIndex`]: vectors partitioned into inverted lists by their
//!   nearest k-means centroid; a query scans only the lists of its `P`
//!   nearest centroids.
//! - [`IvfPqIndex`]: same partitioning, but each list stores the product
//!   quantized residual `vector - centroid` instead of the raw vector.
//!
//! All inputs reaching a backend are already unit length.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::vector::clustering::{
    KMeansParams, MAX_POINTS_PER_CENTROID, assign_to_nearest_centroid, kmeans_clustering,
    nearest_centroids,
};
use crate::vector::normalize::squared_l2;
use crate::vector::quantizer::{ProductQuantizer, subsample};
use crate::vector::types::{ClusterId, IndexKind, Neighbor, VectorError, VectorId, VectorResult};

/// Operations every backend provides.
pub trait VectorBackend: Send + Sync {
    fn kind(&self) -> IndexKind;

    fn dimension(&self) -> usize;

    fn is_trained(&self) -> bool;

    /// Learns the backend's parameters from a unit-length sample.
    fn train(&mut self, sample: &[Vec<f32>], params: &KMeansParams) -> VectorResult<()>;

    /// Stores unit-length vectors under the given IDs, replacing existing entries.
    fn add(&mut self, vectors: &[Vec<f32>], ids: &[VectorId]) -> VectorResult<()>;

    /// Every stored vector within `radius` (L2) of a unit-length query.
    ///
    /// Hits are unordered; `probe_count` is ignored by unclustered backends.
    fn search(&self, query: &[f32], radius: f32, probe_count: usize) -> Vec<Neighbor>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, id: VectorId) -> bool;

    /// Every stored ID, in no particular order.
    fn ids(&self) -> Vec<VectorId>;

    /// Approximate storage cost of one vector, excluding its ID.
    fn bytes_per_vector(&self) -> usize;

    /// Verifies internal invariants after deserialization.
    fn check_consistency(&self) -> Result<(), String>;
}

/// One inverted list: IDs plus fixed-stride entries.
#[derive(Debug, Clone, PartialEq, Default, bincode::Encode, bincode::Decode)]
pub struct InvertedList<T> {
    ids: Vec<VectorId>,
    entries: Vec<T>,
}

impl<T: Copy> InvertedList<T> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Iterates over `(id, entry)` pairs.
    pub fn iter(&self, stride: usize) -> impl Iterator<Item = (VectorId, &[T])> + '_ {
        self.ids.iter().copied().zip(self.entries.chunks_exact(stride))
    }
}

/// A fixed number of inverted lists with an ID locator.
///
/// Inserting an ID that is already present moves it; the locator guarantees
/// each ID lives in exactly one slot.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct InvertedLists<T> {
    stride: usize,
    lists: Vec<InvertedList<T>>,
    locator: HashMap<VectorId, (u32, usize)>,
}

impl<T: Copy> InvertedLists<T> {
    pub fn new(list_count: usize, stride: usize) -> Self {
        Self {
            stride,
            lists: (0..list_count)
                .map(|_| InvertedList {
                    ids: Vec::new(),
                    entries: Vec::new(),
                })
                .collect(),
            locator: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.locator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locator.is_empty()
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    pub fn contains(&self, id: VectorId) -> bool {
        self.locator.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<VectorId> {
        self.locator.keys().copied().collect()
    }

    pub fn list(&self, cluster: ClusterId) -> &InvertedList<T> {
        &self.lists[cluster.as_index()]
    }

    /// Stores `entry` under `id` in list `cluster`, replacing any previous entry.
    pub fn insert(&mut self, cluster: ClusterId, id: VectorId, entry: &[T]) {
        debug_assert_eq!(entry.len(), self.stride);
        self.remove(id);

        let list = &mut self.lists[cluster.as_index()];
        let position = list.ids.len();
        list.ids.push(id);
        list.entries.extend_from_slice(entry);
        self.locator.insert(id, (cluster.get(), position));
    }

    /// Removes `id` if present. The last entry of its list takes its slot.
    pub fn remove(&mut self, id: VectorId) -> bool {
        let Some((cluster, position)) = self.locator.remove(&id) else {
            return false;
        };
        let stride = self.stride;
        let list = &mut self.lists[cluster as usize];
        let last = list.ids.len() - 1;

        if position != last {
            let moved = list.ids[last];
            list.ids[position] = moved;
            list.entries
                .copy_within(last * stride..(last + 1) * stride, position * stride);
            self.locator.insert(moved, (cluster, position));
        }
        list.ids.truncate(last);
        list.entries.truncate(last * stride);
        true
    }

    fn check_consistency(&self) -> Result<(), String> {
        let mut total = 0;
        for (c, list) in self.lists.iter().enumerate() {
            if list.ids.len().checked_mul(self.stride) != Some(list.entries.len()) {
                return Err(format!("inverted list {c} has mismatched entry storage"));
            }
            for (position, id) in list.ids.iter().enumerate() {
                if self.locator.get(id) != Some(&(c as u32, position)) {
                    return Err(format!("id {id} is not located where it is stored"));
                }
            }
            total += list.ids.len();
        }
        if total != self.locator.len() {
            return Err("locator size disagrees with stored entries".to_string());
        }
        Ok(())
    }
}

fn check_add_dimensions(
    dimension: usize,
    vectors: &[Vec<f32>],
    ids: &[VectorId],
) -> VectorResult<()> {
    if vectors.len() != ids.len() {
        return Err(VectorError::LengthMismatch {
            left_name: "vectors",
            left: vectors.len(),
            right_name: "ids",
            right: ids.len(),
        });
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(VectorError::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Exact search over every stored vector.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct FlatIndex {
    dimension: usize,
    storage: InvertedLists<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            storage: InvertedLists::new(1, dimension),
        }
    }

    /// Stored vector for `id`, if any.
    pub fn get(&self, id: VectorId) -> Option<&[f32]> {
        let (_, position) = *self.storage.locator.get(&id)?;
        let list = self.storage.list(ClusterId::new(0));
        Some(&list.entries[position * self.dimension..(position + 1) * self.dimension])
    }
}

impl VectorBackend for FlatIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Exact
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn train(&mut self, _sample: &[Vec<f32>], _params: &KMeansParams) -> VectorResult<()> {
        Ok(())
    }

    fn add(&mut self, vectors: &[Vec<f32>], ids: &[VectorId]) -> VectorResult<()> {
        check_add_dimensions(self.dimension, vectors, ids)?;
        for (vector, &id) in vectors.iter().zip(ids) {
            self.storage.insert(ClusterId::new(0), id, vector);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], radius: f32, _probe_count: usize) -> Vec<Neighbor> {
        scan_exact(self.storage.list(ClusterId::new(0)), self.dimension, query, radius)
    }

    fn len(&self) -> usize {
        self.storage.len()
    }

    fn contains(&self, id: VectorId) -> bool {
        self.storage.contains(id)
    }

    fn ids(&self) -> Vec<VectorId> {
        self.storage.ids()
    }

    fn bytes_per_vector(&self) -> usize {
        self.dimension * std::mem::size_of::<f32>()
    }

    fn check_consistency(&self) -> Result<(), String> {
        if self.storage.list_count() != 1 || self.storage.stride() != self.dimension {
            return Err("flat storage has the wrong shape".to_string());
        }
        self.storage.check_consistency()
    }
}

fn scan_exact(
    list: &InvertedList<f32>,
    stride: usize,
    query: &[f32],
    radius: f32,
) -> Vec<Neighbor> {
    list.iter(stride)
        .filter_map(|(id, stored)| {
            let distance = squared_l2(query, stored).sqrt();
            (distance <= radius).then_some(Neighbor { id, distance })
        })
        .collect()
}

/// K-means centroids that route vectors to inverted lists.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct CoarseQuantizer {
    cluster_count: usize,
    centroids: Vec<Vec<f32>>,
}

impl CoarseQuantizer {
    pub fn new(cluster_count: usize) -> Self {
        Self {
            cluster_count,
            centroids: Vec::new(),
        }
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    pub fn centroid(&self, cluster: ClusterId) -> &[f32] {
        &self.centroids[cluster.as_index()]
    }

    fn train(&mut self, sample: &[Vec<f32>], params: &KMeansParams) -> VectorResult<()> {
        let training = subsample(sample, self.cluster_count * MAX_POINTS_PER_CENTROID, params.seed);
        let result = kmeans_clustering(&training, self.cluster_count, params)?;
        tracing::debug!(
            cluster_count = self.cluster_count,
            training_vectors = training.len(),
            iterations = result.iterations,
            inertia = result.inertia,
            "trained coarse quantizer"
        );
        self.centroids = result.centroids;
        Ok(())
    }

    pub fn assign(&self, vector: &[f32]) -> ClusterId {
        assign_to_nearest_centroid(vector, &self.centroids).0
    }

    /// The `probe_count` clusters nearest to `query`.
    pub fn probe(&self, query: &[f32], probe_count: usize) -> Vec<ClusterId> {
        nearest_centroids(query, &self.centroids, probe_count)
            .into_iter()
            .map(|(cluster, _)| cluster)
            .collect()
    }

    fn check_consistency(&self, dimension: usize) -> Result<(), String> {
        if self.is_trained()
            && (self.centroids.len() != self.cluster_count
                || self.centroids.iter().any(|c| c.len() != dimension))
        {
            return Err("coarse centroids have the wrong shape".to_string());
        }
        Ok(())
    }
}

fn ensure_trained(trained: bool) -> VectorResult<()> {
    if trained {
        Ok(())
    } else {
        Err(VectorError::State {
            operation: "add",
            state: "untrained".to_string(),
            suggestion: "Call train() with a representative sample first",
        })
    }
}

/// Inverted lists holding full-precision vectors.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct IvfFlatIndex {
    dimension: usize,
    coarse: CoarseQuantizer,
    lists: InvertedLists<f32>,
}

impl IvfFlatIndex {
    pub fn new(dimension: usize, cluster_count: usize) -> Self {
        Self {
            dimension,
            coarse: CoarseQuantizer::new(cluster_count),
            lists: InvertedLists::new(cluster_count, dimension),
        }
    }

    pub fn cluster_count(&self) -> usize {
        self.coarse.cluster_count()
    }

    /// Number of vectors in each inverted list.
    pub fn list_sizes(&self) -> Vec<usize> {
        (0..self.lists.list_count())
            .map(|c| self.lists.list(ClusterId::new(c as u32)).len())
            .collect()
    }
}

impl VectorBackend for IvfFlatIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::ClusteredExact
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_trained(&self) -> bool {
        self.coarse.is_trained()
    }

    fn train(&mut self, sample: &[Vec<f32>], params: &KMeansParams) -> VectorResult<()> {
        self.coarse.train(sample, params)
    }

    fn add(&mut self, vectors: &[Vec<f32>], ids: &[VectorId]) -> VectorResult<()> {
        ensure_trained(self.is_trained())?;
        check_add_dimensions(self.dimension, vectors, ids)?;

        let assignments: Vec<ClusterId> =
            vectors.par_iter().map(|v| self.coarse.assign(v)).collect();
        for ((vector, &id), cluster) in vectors.iter().zip(ids).zip(assignments) {
            self.lists.insert(cluster, id, vector);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], radius: f32, probe_count: usize) -> Vec<Neighbor> {
        self.coarse
            .probe(query, probe_count)
            .into_iter()
            .flat_map(|cluster| scan_exact(self.lists.list(cluster), self.dimension, query, radius))
            .collect()
    }

    fn len(&self) -> usize {
        self.lists.len()
    }

    fn contains(&self, id: VectorId) -> bool {
        self.lists.contains(id)
    }

    fn ids(&self) -> Vec<VectorId> {
        self.lists.ids()
    }

    fn bytes_per_vector(&self) -> usize {
        self.dimension * std::mem::size_of::<f32>()
    }

    fn check_consistency(&self) -> Result<(), String> {
        self.coarse.check_consistency(self.dimension)?;
        if self.lists.list_count() != self.coarse.cluster_count()
            || self.lists.stride() != self.dimension
        {
            return Err("inverted lists have the wrong shape".to_string());
        }
        self.lists.check_consistency()
    }
}

/// Inverted lists holding product-quantized residuals.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct IvfPqIndex {
    dimension: usize,
    subvector_count: usize,
    bits_per_code: u8,
    coarse: CoarseQuantizer,
    quantizer: Option<ProductQuantizer>,
    lists: InvertedLists<u8>,
}

impl IvfPqIndex {
    pub fn new(
        dimension: usize,
        cluster_count: usize,
        subvector_count: usize,
        bits_per_code: u8,
    ) -> Self {
        Self {
            dimension,
            subvector_count,
            bits_per_code,
            coarse: CoarseQuantizer::new(cluster_count),
            quantizer: None,
            lists: InvertedLists::new(cluster_count, subvector_count),
        }
    }

    pub fn cluster_count(&self) -> usize {
        self.coarse.cluster_count()
    }

    fn residual(&self, vector: &[f32], cluster: ClusterId) -> Vec<f32> {
        vector
            .iter()
            .zip(self.coarse.centroid(cluster))
            .map(|(v, c)| v - c)
            .collect()
    }
}

impl VectorBackend for IvfPqIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::ClusteredQuantized
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_trained(&self) -> bool {
        self.coarse.is_trained() && self.quantizer.is_some()
    }

    fn train(&mut self, sample: &[Vec<f32>], params: &KMeansParams) -> VectorResult<()> {
        ProductQuantizer::validate_shape(self.dimension, self.subvector_count, self.bits_per_code)?;
        let codebook_size = 1usize << self.bits_per_code;
        if sample.len() < codebook_size {
            return Err(VectorError::ClusteringFailed(format!(
                "product quantizer needs at least {codebook_size} training vectors, got {}",
                sample.len()
            )));
        }

        let mut coarse = self.coarse.clone();
        coarse.train(sample, params)?;

        let residuals: Vec<Vec<f32>> = sample
            .par_iter()
            .map(|v| {
                let cluster = coarse.assign(v);
                v.iter().zip(coarse.centroid(cluster)).map(|(x, c)| x - c).collect()
            })
            .collect();

        let quantizer = ProductQuantizer::train(
            &residuals,
            self.dimension,
            self.subvector_count,
            self.bits_per_code,
            params,
        )?;

        self.coarse = coarse;
        self.quantizer = Some(quantizer);
        Ok(())
    }

    fn add(&mut self, vectors: &[Vec<f32>], ids: &[VectorId]) -> VectorResult<()> {
        ensure_trained(self.is_trained())?;
        check_add_dimensions(self.dimension, vectors, ids)?;
        let Some(quantizer) = self.quantizer.as_ref() else {
            return ensure_trained(false);
        };

        let encoded: Vec<(ClusterId, Vec<u8>)> = vectors
            .par_iter()
            .map(|v| {
                let cluster = self.coarse.assign(v);
                (cluster, quantizer.encode(&self.residual(v, cluster)))
            })
            .collect();

        for ((cluster, code), &id) in encoded.into_iter().zip(ids) {
            self.lists.insert(cluster, id, &code);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], radius: f32, probe_count: usize) -> Vec<Neighbor> {
        let Some(quantizer) = self.quantizer.as_ref() else {
            return Vec::new();
        };
        let radius_squared = radius * radius;

        self.coarse
            .probe(query, probe_count)
            .into_iter()
            .flat_map(|cluster| {
                let table = quantizer.distance_table(&self.residual(query, cluster));
                self.lists
                    .list(cluster)
                    .iter(self.subvector_count)
                    .filter_map(move |(id, code)| {
                        let squared = table.squared_distance(code);
                        (squared <= radius_squared).then(|| Neighbor {
                            id,
                            distance: squared.sqrt(),
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn len(&self) -> usize {
        self.lists.len()
    }

    fn contains(&self, id: VectorId) -> bool {
        self.lists.contains(id)
    }

    fn ids(&self) -> Vec<VectorId> {
        self.lists.ids()
    }

    /// Codes are stored one byte per sub-vector whatever `bits_per_code` is.
    fn bytes_per_vector(&self) -> usize {
        self.subvector_count
    }

    fn check_consistency(&self) -> Result<(), String> {
        self.coarse.check_consistency(self.dimension)?;
        if let Some(quantizer) = &self.quantizer {
            quantizer.check_consistency()?;
            if quantizer.subvector_count() != self.subvector_count
                || quantizer.bits_per_code() != self.bits_per_code
            {
                return Err("product quantizer disagrees with the index configuration".to_string());
            }
        }
        if self.lists.list_count() != self.coarse.cluster_count()
            || self.lists.stride() != self.subvector_count
        {
            return Err("inverted lists have the wrong shape".to_string());
        }
        self.lists.check_consistency()?;

        let codebook_size = 1usize << self.bits_per_code.min(8);
        let out_of_range = self
            .lists
            .lists
            .iter()
            .flat_map(|list| &list.entries)
            .any(|&code| code as usize >= codebook_size);
        if out_of_range {
            return Err("a stored code is outside the codebook".to_string());
        }
        Ok(())
    }
}

/// The closed set of backends an index can hold.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub enum Backend {
    Exact(FlatIndex),
    ClusteredExact(IvfFlatIndex),
    ClusteredQuantized(IvfPqIndex),
}

impl Backend {
    pub fn as_backend(&self) -> &dyn VectorBackend {
        match self {
            Self::Exact(index) => index,
            Self::ClusteredExact(index) => index,
            Self::ClusteredQuantized(index) => index,
        }
    }

    pub fn as_backend_mut(&mut self) -> &mut dyn VectorBackend {
        match self {
            Self::Exact(index) => index,
            Self::ClusteredExact(index) => index,
            Self::ClusteredQuantized(index) => index,
        }
    }
}
