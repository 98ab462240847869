//! Product quantization of residual vectors.
//!
//! A vector of dimension `d` is cut into `m` equal-width sub-vectors and each
//! sub-vector is replaced by the index of its nearest centroid in a learned
//! codebook of `2^b` entries. With `b <= 8` a code is one byte per
//! sub-vector, so a 768-dimensional vector with `m = 64` shrinks from 3072
//! bytes to 64.
//!
//! Queries are answered with asymmetric distance computation: the query stays
//! in full precision and a per-query lookup table of `m * 2^b` partial
//! squared distances turns each code comparison into `m` table reads.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::vector::clustering::{KMeansParams, MAX_POINTS_PER_CENTROID, kmeans_clustering};
use crate::vector::normalize::squared_l2;
use crate::vector::types::{VectorError, VectorResult};

/// Largest supported code width in bits.
pub const MAX_BITS_PER_CODE: u8 = 8;

/// Learned codebooks for `m` sub-vector spaces.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct ProductQuantizer {
    dimension: usize,
    subvector_count: usize,
    bits_per_code: u8,
    /// `codebooks[j]` holds `2^b` centroids of width `dimension / m`, flattened.
    codebooks: Vec<Vec<f32>>,
}

impl ProductQuantizer {
    /// Checks that a `(dimension, m, b)` triple describes a valid quantizer.
    pub fn validate_shape(
        dimension: usize,
        subvector_count: usize,
        bits_per_code: u8,
    ) -> VectorResult<()> {
        if subvector_count == 0 {
            return Err(VectorError::Configuration {
                reason: "subvector_count must be at least 1".to_string(),
            });
        }
        if dimension % subvector_count != 0 {
            return Err(VectorError::Configuration {
                reason: format!(
                    "dimension {dimension} is not divisible by subvector_count {subvector_count}"
                ),
            });
        }
        if bits_per_code == 0 || bits_per_code > MAX_BITS_PER_CODE {
            return Err(VectorError::Configuration {
                reason: format!(
                    "bits_per_code must be between 1 and {MAX_BITS_PER_CODE}, got {bits_per_code}"
                ),
            });
        }
        Ok(())
    }

    /// Trains one codebook per sub-vector space on the given residuals.
    ///
    /// Needs at least `2^b` training vectors.
    pub fn train(
        residuals: &[Vec<f32>],
        dimension: usize,
        subvector_count: usize,
        bits_per_code: u8,
        params: &KMeansParams,
    ) -> VectorResult<Self> {
        Self::validate_shape(dimension, subvector_count, bits_per_code)?;

        let codebook_size = 1usize << bits_per_code;
        if residuals.len() < codebook_size {
            return Err(VectorError::ClusteringFailed(format!(
                "product quantizer needs at least {codebook_size} training vectors, got {}",
                residuals.len()
            )));
        }
        if let Some(bad) = residuals.iter().find(|r| r.len() != dimension) {
            return Err(VectorError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let sub_dim = dimension / subvector_count;
        let training = subsample(residuals, codebook_size * MAX_POINTS_PER_CENTROID, params.seed);

        let codebooks = (0..subvector_count)
            .into_par_iter()
            .map(|j| {
                let chunks: Vec<&[f32]> = training
                    .iter()
                    .map(|r| &r[j * sub_dim..(j + 1) * sub_dim])
                    .collect();
                let sub_params = KMeansParams {
                    max_iterations: params.max_iterations,
                    seed: params.seed.wrapping_add(j as u64 + 1),
                };
                kmeans_clustering(&chunks, codebook_size, &sub_params)
                    .map(|result| result.centroids.into_iter().flatten().collect::<Vec<f32>>())
                    .map_err(VectorError::from)
            })
            .collect::<VectorResult<Vec<_>>>()?;

        tracing::debug!(
            subvector_count,
            bits_per_code,
            training_vectors = training.len(),
            "trained product quantizer"
        );

        Ok(Self {
            dimension,
            subvector_count,
            bits_per_code,
            codebooks,
        })
    }

    #[must_use]
    pub fn subvector_count(&self) -> usize {
        self.subvector_count
    }

    #[must_use]
    pub fn bits_per_code(&self) -> u8 {
        self.bits_per_code
    }

    #[must_use]
    pub fn codebook_size(&self) -> usize {
        1usize << self.bits_per_code
    }

    fn sub_dim(&self) -> usize {
        self.dimension / self.subvector_count
    }

    fn codeword(&self, subspace: usize, code: u8) -> &[f32] {
        let sub_dim = self.sub_dim();
        let start = code as usize * sub_dim;
        &self.codebooks[subspace][start..start + sub_dim]
    }

    /// Encodes a residual as one codeword index per sub-vector.
    #[must_use]
    pub fn encode(&self, residual: &[f32]) -> Vec<u8> {
        let sub_dim = self.sub_dim();
        (0..self.subvector_count)
            .map(|j| {
                let chunk = &residual[j * sub_dim..(j + 1) * sub_dim];
                let mut best = 0u8;
                let mut best_distance = f32::INFINITY;
                for c in 0..self.codebook_size() {
                    let distance = squared_l2(chunk, self.codeword(j, c as u8));
                    if distance < best_distance {
                        best_distance = distance;
                        best = c as u8;
                    }
                }
                best
            })
            .collect()
    }

    /// Reconstructs the approximate residual a code stands for.
    #[must_use]
    pub fn decode(&self, code: &[u8]) -> Vec<f32> {
        code.iter()
            .enumerate()
            .flat_map(|(j, &c)| self.codeword(j, c).iter().copied())
            .collect()
    }

    /// Precomputes partial squared distances between a query residual and
    /// every codeword.
    #[must_use]
    pub fn distance_table(&self, query_residual: &[f32]) -> DistanceTable {
        let sub_dim = self.sub_dim();
        let codebook_size = self.codebook_size();
        let mut table = Vec::with_capacity(self.subvector_count * codebook_size);
        for j in 0..self.subvector_count {
            let chunk = &query_residual[j * sub_dim..(j + 1) * sub_dim];
            for c in 0..codebook_size {
                table.push(squared_l2(chunk, self.codeword(j, c as u8)));
            }
        }
        DistanceTable {
            codebook_size,
            table,
        }
    }

    pub(crate) fn check_consistency(&self) -> Result<(), String> {
        Self::validate_shape(self.dimension, self.subvector_count, self.bits_per_code)
            .map_err(|e| e.to_string())?;
        let expected = self.codebook_size() * self.sub_dim();
        if self.codebooks.len() != self.subvector_count
            || self.codebooks.iter().any(|cb| cb.len() != expected)
        {
            return Err("product quantizer codebooks have the wrong shape".to_string());
        }
        Ok(())
    }
}

/// Per-query table of partial squared distances.
#[derive(Debug, Clone)]
pub struct DistanceTable {
    codebook_size: usize,
    table: Vec<f32>,
}

impl DistanceTable {
    /// Estimated squared L2 distance between the query and an encoded vector.
    #[must_use]
    pub fn squared_distance(&self, code: &[u8]) -> f32 {
        code.iter()
            .enumerate()
            .map(|(j, &c)| self.table[j * self.codebook_size + c as usize])
            .sum()
    }
}

/// Randomly picks at most `limit` rows, deterministically for a seed.
pub(crate) fn subsample(vectors: &[Vec<f32>], limit: usize, seed: u64) -> Vec<&[f32]> {
    if vectors.len() <= limit {
        return vectors.iter().map(Vec::as_slice).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, vectors.len(), limit).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| vectors[i].as_slice()).collect()
}
