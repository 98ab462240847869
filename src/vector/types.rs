//! Type-safe wrappers and core types for vector search functionality.
//!
//! This module provides newtypes and error types for the clone index. All
//! types implement the traits needed for ergonomic use, persistence through
//! `bincode`, and configuration through `serde`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard vector dimension for code embeddings (GraphCodeBERT-sized models).
pub const VECTOR_DIMENSION_768: usize = 768;

/// Type-safe wrapper for vector IDs.
///
/// IDs are signed 64-bit integers so they can be used directly as SQLite
/// row keys. They are stable across save/load and are the join key into the
/// metadata store.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
#[serde(transparent)]
pub struct VectorId(i64);

impl VectorId {
    /// Creates a new `VectorId`.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the underlying i64 value.
    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }

    /// Converts to little-endian bytes for storage.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Creates from little-endian bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(i64::from_le_bytes(bytes))
    }
}

impl From<i64> for VectorId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for VectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a cluster (inverted list) inside a clustered backend.
///
/// Unlike vector IDs these are dense, zero-based positions into the
/// centroid table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, bincode::Encode, bincode::Decode,
)]
pub struct ClusterId(u32);

impl ClusterId {
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn as_index(&self) -> usize {
        self.0 as usize
    }
}

/// Type-safe wrapper for similarity scores.
///
/// Scores are in the range [0.0, 1.0] where:
/// - 1.0 indicates identical direction
/// - 0.0 indicates orthogonal (or opposite) vectors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score(f32);

impl Score {
    /// Creates a new `Score` with validation.
    ///
    /// Returns an error if the score is not in the range [0.0, 1.0] or is NaN.
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if value.is_nan() {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score cannot be NaN",
            });
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score must be in range [0.0, 1.0]",
            });
        }
        Ok(Self(value))
    }

    /// Creates a score of 0.0 (no similarity).
    #[must_use]
    pub const fn zero() -> Self {
        Self(0.0)
    }

    /// Creates a score of 1.0 (perfect similarity).
    #[must_use]
    pub const fn one() -> Self {
        Self(1.0)
    }

    /// Returns the underlying f32 value.
    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Type-safe wrapper for vector dimensions.
///
/// Ensures runtime validation of vector dimensions to prevent mismatches
/// between the embedding model and the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Creates a standard 768-dimensional vector dimension.
    #[must_use]
    pub const fn dimension_768() -> Self {
        Self(VECTOR_DIMENSION_768)
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Validates every vector of a batch.
    pub fn validate_batch(&self, vectors: &[Vec<f32>]) -> Result<(), VectorError> {
        vectors.iter().try_for_each(|v| self.validate_vector(v))
    }
}

impl fmt::Display for VectorDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three index flavours supported by [`crate::vector::VectorIndex`].
///
/// The serialized names follow the classic index-factory spelling so that
/// configuration files read naturally (`kind = "IVF,PQ"`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    bincode::Encode,
    bincode::Decode,
)]
pub enum IndexKind {
    /// Brute-force exact search over every stored vector.
    #[serde(rename = "Flat", alias = "exact", alias = "flat")]
    Exact,
    /// Inverted lists over k-means clusters, full-precision vectors.
    #[serde(rename = "IVF,Flat", alias = "ivf_flat", alias = "clustered_exact")]
    ClusteredExact,
    /// Inverted lists over k-means clusters, product-quantized residuals.
    #[default]
    #[serde(rename = "IVF,PQ", alias = "ivf_pq", alias = "clustered_quantized")]
    ClusteredQuantized,
}

impl IndexKind {
    /// Index-factory style name of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "Flat",
            Self::ClusteredExact => "IVF,Flat",
            Self::ClusteredQuantized => "IVF,PQ",
        }
    }

    /// Whether the kind partitions vectors into clusters.
    #[must_use]
    pub const fn is_clustered(&self) -> bool {
        !matches!(self, Self::Exact)
    }

    /// Whether the kind stores quantized codes instead of raw vectors.
    #[must_use]
    pub const fn is_quantized(&self) -> bool {
        matches!(self, Self::ClusteredQuantized)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = VectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(' ', "");
        match normalized.as_str() {
            "flat" | "exact" | "indexflatl2" => Ok(Self::Exact),
            "ivf,flat" | "ivf_flat" | "clustered_exact" | "indexivfflat" => {
                Ok(Self::ClusteredExact)
            }
            "ivf,pq" | "ivf_pq" | "clustered_quantized" | "indexivfpq" => {
                Ok(Self::ClusteredQuantized)
            }
            _ => Err(VectorError::Configuration {
                reason: format!("unknown index kind '{s}'"),
            }),
        }
    }
}

/// Lifecycle state of a [`crate::vector::VectorIndex`].
///
/// Transitions only move forward: `Created -> Trained -> Populated`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, bincode::Encode, bincode::Decode,
)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Created,
    Trained,
    Populated,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Trained => "trained",
            Self::Populated => "populated",
        };
        f.write_str(name)
    }
}

/// A single range-search hit: a stored ID and its L2 distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: VectorId,
    pub distance: f32,
}

/// Results of a multi-query range search.
///
/// Stored in the flat `lims`/`ids`/`distances` layout: the hits of query `i`
/// are `ids[lims[i]..lims[i + 1]]`. Hits of each query are ordered by
/// distance ascending, ties broken by ID ascending.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeSearchResult {
    lims: Vec<usize>,
    ids: Vec<VectorId>,
    distances: Vec<f32>,
}

impl RangeSearchResult {
    /// Builds a result from per-query hit lists, preserving query order.
    #[must_use]
    pub fn from_per_query(per_query: Vec<Vec<Neighbor>>) -> Self {
        let total: usize = per_query.iter().map(Vec::len).sum();
        let mut lims = Vec::with_capacity(per_query.len() + 1);
        let mut ids = Vec::with_capacity(total);
        let mut distances = Vec::with_capacity(total);

        lims.push(0);
        for hits in per_query {
            for hit in hits {
                ids.push(hit.id);
                distances.push(hit.distance);
            }
            lims.push(ids.len());
        }

        Self {
            lims,
            ids,
            distances,
        }
    }

    /// Number of queries this result covers.
    #[must_use]
    pub fn num_queries(&self) -> usize {
        self.lims.len().saturating_sub(1)
    }

    /// Total number of hits across all queries.
    #[must_use]
    pub fn total_hits(&self) -> usize {
        self.ids.len()
    }

    /// Offsets delimiting each query's hits.
    #[must_use]
    pub fn lims(&self) -> &[usize] {
        &self.lims
    }

    /// IDs of the hits of query `query`.
    ///
    /// Returns an empty slice for an out-of-range query index.
    #[must_use]
    pub fn ids(&self, query: usize) -> &[VectorId] {
        match self.bounds(query) {
            Some((start, end)) => &self.ids[start..end],
            None => &[],
        }
    }

    /// Distances of the hits of query `query`.
    #[must_use]
    pub fn distances(&self, query: usize) -> &[f32] {
        match self.bounds(query) {
            Some((start, end)) => &self.distances[start..end],
            None => &[],
        }
    }

    /// Iterates over the hits of query `query`.
    pub fn neighbors(&self, query: usize) -> impl Iterator<Item = Neighbor> + '_ {
        self.ids(query)
            .iter()
            .zip(self.distances(query))
            .map(|(&id, &distance)| Neighbor { id, distance })
    }

    fn bounds(&self, query: usize) -> Option<(usize, usize)> {
        let start = *self.lims.get(query)?;
        let end = *self.lims.get(query + 1)?;
        Some((start, end))
    }
}

/// Errors that can occur during vector operations.
///
/// All error messages include actionable suggestions for resolution.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error("Invalid index configuration: {reason}\nSuggestion: Check the [index] section of the settings")]
    Configuration { reason: String },

    #[error(
        "Operation '{operation}' is not allowed while the index is {state}\nSuggestion: {suggestion}"
    )]
    State {
        operation: &'static str,
        state: String,
        suggestion: &'static str,
    },

    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid score value: {value}\nReason: {reason}")]
    InvalidScore { value: f32, reason: &'static str },

    #[error(
        "Invalid similarity threshold: {value}\nSuggestion: Use a cosine similarity between 0.0 and 1.0"
    )]
    InvalidThreshold { value: f32 },

    #[error(
        "Invalid distance threshold: {value}\nSuggestion: Distance thresholds must be finite and non-negative"
    )]
    InvalidDistance { value: f32 },

    #[error("Invalid probe count: {value}\nSuggestion: Probe at least one cluster")]
    InvalidProbeCount { value: usize },

    #[error(
        "Length mismatch: {left_name} has {left} entries but {right_name} has {right}\nSuggestion: Pass one entry per vector"
    )]
    LengthMismatch {
        left_name: &'static str,
        left: usize,
        right_name: &'static str,
        right: usize,
    },

    #[error(
        "Clustering failed: {0}\nSuggestion: Ensure sufficient vectors are available for clustering (minimum: k clusters)"
    )]
    ClusteringFailed(String),

    #[error(
        "Embedding generation failed: {0}\nSuggestion: Verify the embedding model is properly initialized"
    )]
    EmbeddingFailed(String),

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Storage(#[from] std::io::Error),

    #[error(
        "Corrupt index artifact '{path}': {reason}\nSuggestion: Rebuild the index from the source snippets"
    )]
    CorruptArtifact { path: String, reason: String },

    #[error(
        "Serialization error: {0}\nSuggestion: Check that vector data is valid and not corrupted"
    )]
    Serialization(String),

    #[error(
        "Invalid storage version: expected {expected}, got {actual}\nSuggestion: Rebuild the index with this version of the library"
    )]
    VersionMismatch { expected: u32, actual: u32 },
}

/// Result type alias for vector operations.
pub type VectorResult<T> = Result<T, VectorError>;
