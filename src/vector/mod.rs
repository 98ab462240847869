//! Vector indexing and threshold search for code embeddings.
//!
//! Embeddings are normalized to unit length, so the L2 distance between two
//! of them is a monotone function of their cosine similarity
//! (`d² = 2 - 2·cos`). A similarity threshold therefore becomes an L2 radius,
//! and "find every clone at least this similar" becomes a range search.
//!
//! # Architecture
//! Three interchangeable backends:
//! - `Flat`: exact, exhaustive
//! - `IVF,Flat`: k-means inverted lists, full-precision vectors
//! - `IVF,PQ`: k-means inverted lists, product-quantized residuals
//!
//! Clustered backends probe only the `P` nearest of `N_c` clusters per query,
//! trading recall for sub-linear search.

mod backend;
mod clustering;
mod concurrent;
mod embedding;
mod index;
mod metric;
mod normalize;
mod quantizer;
mod storage;
mod types;

// Re-export core types for public API
pub use backend::{Backend, FlatIndex, IvfFlatIndex, IvfPqIndex, VectorBackend};
pub use clustering::{
    ClusteringError, KMeansParams, KMeansResult, assign_to_nearest_centroid, kmeans_clustering,
    nearest_centroids,
};
pub use concurrent::SharedVectorIndex;
#[cfg(test)]
pub use embedding::MockEmbeddingGenerator;
pub use embedding::{
    EmbeddingGenerator, FastEmbedGenerator, LazyEmbeddingGenerator, parse_embedding_model,
};
pub use index::{IndexConfiguration, IndexStats, VectorIndex};
pub use metric::{
    SELF_MATCH_SIMILARITY, ZERO_VECTOR_DISTANCE, clamp_similarity, distance_to_similarity,
    similarity_to_distance,
};
pub use normalize::{
    cosine_similarity, is_unit, is_zero, l2_norm, normalize_batch, normalize_in_place,
    normalized, squared_l2,
};
pub use quantizer::{DistanceTable, ProductQuantizer};
pub use storage::{HEADER_SIZE, IndexArtifact, MAGIC_BYTES, STORAGE_VERSION};
pub use types::{
    ClusterId, IndexKind, IndexState, Neighbor, RangeSearchResult, Score, VECTOR_DIMENSION_768,
    VectorDimension, VectorError, VectorId, VectorResult,
};
