//! K-means clustering for the inverted-list and product-quantizer training.
//!
//! A pure Rust implementation of Lloyd's algorithm using squared Euclidean
//! distance and K-means++ seeding. The same routine trains the coarse
//! centroids of the clustered backends (on unit vectors) and the per
//! sub-vector codebooks of the product quantizer (on residual chunks).
//!
//! # Algorithm Details
//! - Distance metric: squared L2
//! - Initialization: K-means++ for better convergence
//! - Max iterations: configurable (default 25)
//! - Convergence tolerance: 1e-4 mean centroid movement
//!
//! # Performance Characteristics
//! - O(n * k * d * iterations) time complexity
//! - O(k * d) space for centroids
//! - Parallel assignment step (rayon)

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;

use crate::vector::normalize::squared_l2;
use crate::vector::types::{ClusterId, VectorError};

/// Default maximum number of Lloyd iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// Training samples beyond this many points per centroid add little accuracy.
pub const MAX_POINTS_PER_CENTROID: usize = 256;

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Epsilon for floating-point comparisons.
const EPSILON: f32 = 1e-12;

/// Tuning knobs for a clustering run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeansParams {
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for KMeansParams {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: 42,
        }
    }
}

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, each a vector of the same dimension as input vectors.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster assignment for each input vector.
    pub assignments: Vec<ClusterId>,

    /// Number of iterations until convergence.
    pub iterations: usize,

    /// Sum of squared distances of each vector to its centroid.
    pub inertia: f32,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure vectors are generated before clustering"
    )]
    EmptyVectorSet,

    #[error(
        "Invalid cluster count {k} for {n} training vectors\nSuggestion: Use k between 1 and the number of training vectors"
    )]
    InvalidClusterCount { k: usize, n: usize },

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,

    #[error(
        "Failed to initialize centroids\nSuggestion: Check that vectors contain valid floating-point values"
    )]
    InitializationFailed,

    #[error("Vector operation error: {0}")]
    VectorError(#[from] VectorError),
}

impl From<ClusteringError> for VectorError {
    fn from(err: ClusteringError) -> Self {
        match err {
            ClusteringError::VectorError(inner) => inner,
            other => VectorError::ClusteringFailed(other.to_string()),
        }
    }
}

/// Performs K-means clustering on a set of vectors.
///
/// # Arguments
/// * `vectors` - Input vectors to cluster (must be non-empty and same dimension)
/// * `k` - Number of clusters (must be >= 1 and <= number of vectors)
/// * `params` - Iteration cap and RNG seed
///
/// # Algorithm
/// 1. Initialize centroids using K-means++ method
/// 2. Iterate until convergence or max iterations:
///    - Assign each vector to nearest centroid (in parallel)
///    - Update centroids as mean of assigned vectors
///    - Check convergence based on centroid movement
#[must_use = "clustering results should be used or the computation is wasted"]
pub fn kmeans_clustering(
    vectors: &[&[f32]],
    k: usize,
    params: &KMeansParams,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount {
            k,
            n: vectors.len(),
        });
    }

    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centroids = initialize_centroids_kmeans_plus_plus(vectors, k, &mut rng)?;
    let mut assignments: Vec<ClusterId> = Vec::new();
    let mut iterations = 0;
    let max_iterations = params.max_iterations.max(1);

    loop {
        iterations += 1;

        let new_assignments: Vec<ClusterId> = vectors
            .par_iter()
            .map(|vector| assign_to_nearest_centroid(vector, &centroids).0)
            .collect();

        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= max_iterations {
            break;
        }

        let new_centroids = update_centroids(vectors, &assignments, k, &mut rng);
        let movement = calculate_centroid_movement(&centroids, &new_centroids);
        centroids = new_centroids;

        if movement < CONVERGENCE_TOLERANCE {
            assignments = vectors
                .par_iter()
                .map(|vector| assign_to_nearest_centroid(vector, &centroids).0)
                .collect();
            break;
        }
    }

    if iterations >= max_iterations {
        tracing::debug!(
            iterations,
            k,
            "k-means stopped at the iteration cap before full convergence"
        );
    }

    let inertia = vectors
        .iter()
        .zip(assignments.iter())
        .map(|(v, c)| squared_l2(v, &centroids[c.as_index()]))
        .sum();

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
        inertia,
    })
}

/// Assigns a vector to the nearest centroid by squared L2 distance.
///
/// Returns the winning cluster and its squared distance. Ties go to the
/// lower cluster index.
pub fn assign_to_nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> (ClusterId, f32) {
    let mut best_distance = f32::INFINITY;
    let mut best_cluster = 0;

    for (i, centroid) in centroids.iter().enumerate() {
        let distance = squared_l2(vector, centroid);
        if distance < best_distance {
            best_distance = distance;
            best_cluster = i;
        }
    }

    (ClusterId::new(best_cluster as u32), best_distance)
}

/// Returns the `n` nearest centroids to `vector`, closest first.
///
/// `n` is clamped to the number of centroids.
pub fn nearest_centroids(
    vector: &[f32],
    centroids: &[Vec<f32>],
    n: usize,
) -> Vec<(ClusterId, f32)> {
    let mut scored: Vec<(ClusterId, f32)> = centroids
        .iter()
        .enumerate()
        .map(|(i, c)| (ClusterId::new(i as u32), squared_l2(vector, c)))
        .collect();

    let n = n.min(scored.len());
    if n == 0 {
        return Vec::new();
    }
    if n < scored.len() {
        scored.select_nth_unstable_by(n - 1, |a, b| {
            a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(n);
    }
    scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    scored
}

/// Updates centroids as the mean of their assigned vectors.
///
/// Empty clusters are reseeded from a random input vector.
fn update_centroids(
    vectors: &[&[f32]],
    assignments: &[ClusterId],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut new_centroids = vec![vec![0.0f32; dimension]; k];
    let mut cluster_sizes = vec![0usize; k];

    for (vector, cluster_id) in vectors.iter().zip(assignments.iter()) {
        let idx = cluster_id.as_index();
        for (acc, &value) in new_centroids[idx].iter_mut().zip(vector.iter()) {
            *acc += value;
        }
        cluster_sizes[idx] += 1;
    }

    for (centroid, &size) in new_centroids.iter_mut().zip(cluster_sizes.iter()) {
        if size == 0 {
            let random_idx = rng.random_range(0..vectors.len());
            centroid.copy_from_slice(vectors[random_idx]);
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
        }
    }

    new_centroids
}

/// Initializes centroids using the K-means++ algorithm.
///
/// K-means++ selects initial centroids that are far apart, leading to
/// better convergence properties than random initialization.
fn initialize_centroids_kmeans_plus_plus(
    vectors: &[&[f32]],
    k: usize,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f32>>, ClusteringError> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(vectors[first_idx].to_vec());

    // Squared distance from each vector to its nearest chosen centroid.
    let mut min_distances: Vec<f32> = vectors
        .par_iter()
        .map(|v| squared_l2(v, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f32 = min_distances.iter().sum();

        let next_idx = if total < EPSILON {
            // Every point coincides with a chosen centroid; duplicates are
            // the only remaining option.
            rng.random_range(0..vectors.len())
        } else {
            let target = rng.random::<f32>() * total;
            let mut cumulative = 0.0;
            let mut chosen = vectors.len() - 1;
            for (i, &distance) in min_distances.iter().enumerate() {
                cumulative += distance;
                if cumulative >= target {
                    chosen = i;
                    break;
                }
            }
            chosen
        };

        let centroid = vectors[next_idx].to_vec();
        min_distances
            .par_iter_mut()
            .zip(vectors.par_iter())
            .for_each(|(current, v)| {
                let d = squared_l2(v, &centroid);
                if d < *current {
                    *current = d;
                }
            });
        centroids.push(centroid);
    }

    if centroids.len() != k || centroids.iter().flatten().any(|x| !x.is_finite()) {
        return Err(ClusteringError::InitializationFailed);
    }

    Ok(centroids)
}

/// Mean squared movement of centroids between iterations.
fn calculate_centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(old_c, new_c)| squared_l2(old_c, new_c))
        .sum::<f32>()
        / old.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_refs(vectors: &[Vec<f32>]) -> Vec<&[f32]> {
        vectors.iter().map(Vec::as_slice).collect()
    }

    #[test]
    fn test_assign_to_nearest_centroid() {
        let centroids = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];

        assert_eq!(assign_to_nearest_centroid(&[0.9, 0.1, 0.0], &centroids).0.get(), 0);
        assert_eq!(assign_to_nearest_centroid(&[0.1, 0.9, 0.1], &centroids).0.get(), 1);
        assert_eq!(assign_to_nearest_centroid(&[0.0, 0.1, 0.9], &centroids).0.get(), 2);
    }

    #[test]
    fn test_nearest_centroids_ordering() {
        let centroids = vec![vec![0.0], vec![10.0], vec![2.0], vec![5.0]];
        let nearest = nearest_centroids(&[1.8], &centroids, 3);
        let order: Vec<u32> = nearest.iter().map(|(c, _)| c.get()).collect();
        assert_eq!(order, vec![2, 0, 3]);

        assert_eq!(nearest_centroids(&[1.8], &centroids, 99).len(), 4);
        assert!(nearest_centroids(&[1.8], &centroids, 0).is_empty());
    }

    #[test]
    fn test_kmeans_clustering_basic() {
        let vectors = vec![
            // Cluster 1: mostly x-axis
            vec![1.0, 0.1, 0.0],
            vec![0.9, 0.2, 0.1],
            vec![1.1, 0.0, 0.2],
            // Cluster 2: mostly y-axis
            vec![0.1, 1.0, 0.0],
            vec![0.2, 0.9, 0.1],
            vec![0.0, 1.1, 0.2],
            // Cluster 3: mostly z-axis
            vec![0.0, 0.1, 1.0],
            vec![0.1, 0.2, 0.9],
            vec![0.2, 0.0, 1.1],
        ];

        let result = kmeans_clustering(&as_refs(&vectors), 3, &KMeansParams::default()).unwrap();

        assert_eq!(result.centroids.len(), 3);
        assert_eq!(result.assignments.len(), 9);

        for group in result.assignments.chunks(3) {
            assert!(group.iter().all(|c| *c == group[0]));
        }
        assert_ne!(result.assignments[0], result.assignments[3]);
        assert_ne!(result.assignments[3], result.assignments[6]);
    }

    #[test]
    fn test_kmeans_is_deterministic_for_a_seed() {
        let vectors: Vec<Vec<f32>> = (0..40)
            .map(|i| vec![(i % 7) as f32, (i % 5) as f32 * 0.5, i as f32 * 0.01])
            .collect();
        let params = KMeansParams {
            max_iterations: 10,
            seed: 99,
        };
        let a = kmeans_clustering(&as_refs(&vectors), 4, &params).unwrap();
        let b = kmeans_clustering(&as_refs(&vectors), 4, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_kmeans_edge_cases() {
        let params = KMeansParams::default();

        let empty: Vec<&[f32]> = vec![];
        assert!(matches!(
            kmeans_clustering(&empty, 1, &params),
            Err(ClusteringError::EmptyVectorSet)
        ));

        let one = vec![vec![1.0, 2.0]];
        assert!(matches!(
            kmeans_clustering(&as_refs(&one), 0, &params),
            Err(ClusteringError::InvalidClusterCount { k: 0, .. })
        ));

        let two = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert!(matches!(
            kmeans_clustering(&as_refs(&two), 3, &params),
            Err(ClusteringError::InvalidClusterCount { k: 3, n: 2 })
        ));

        let ragged = vec![vec![1.0, 2.0], vec![3.0, 4.0, 5.0]];
        assert!(matches!(
            kmeans_clustering(&as_refs(&ragged), 1, &params),
            Err(ClusteringError::DimensionMismatch)
        ));
    }

    #[test]
    fn test_single_cluster_is_the_mean() {
        let vectors = vec![
            vec![1.0, 2.0, 3.0],
            vec![4.0, 5.0, 6.0],
            vec![7.0, 8.0, 9.0],
        ];

        let result = kmeans_clustering(&as_refs(&vectors), 1, &KMeansParams::default()).unwrap();

        assert_eq!(result.centroids.len(), 1);
        assert!(result.assignments.iter().all(|c| c.get() == 0));
        let mean = &result.centroids[0];
        assert!((mean[0] - 4.0).abs() < 1e-5);
        assert!((mean[2] - 6.0).abs() < 1e-5);
    }

    #[test]
    fn test_duplicate_points_still_produce_k_centroids() {
        let vectors = vec![vec![1.0, 1.0]; 5];
        let result = kmeans_clustering(&as_refs(&vectors), 3, &KMeansParams::default()).unwrap();
        assert_eq!(result.centroids.len(), 3);
        assert!(result.inertia.abs() < 1e-6);
    }
}
