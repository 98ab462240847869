//! Conversion between cosine similarity and L2 distance.
//!
//! Valid only for unit-length vectors, where `distance² = 2 - 2·cos_sim`.

use crate::vector::types::{VectorError, VectorResult};

/// Similarity at or above which a hit is treated as the query itself.
pub const SELF_MATCH_SIMILARITY: f32 = 0.9999;

/// Distance reported between a zero vector and anything else.
///
/// A zero vector has similarity 0 to every vector, which maps to `√2`.
pub const ZERO_VECTOR_DISTANCE: f32 = std::f32::consts::SQRT_2;

/// Converts a minimum cosine similarity into the equivalent maximum L2 distance.
///
/// # Errors
/// Returns [`VectorError::InvalidThreshold`] when `cos_sim` is outside [0, 1]
/// or NaN.
///
/// # Example
/// ```
/// use codeclone::vector::similarity_to_distance;
/// let radius = similarity_to_distance(0.95).unwrap();
/// assert!((radius - 0.316).abs() < 1e-3);
/// ```
pub fn similarity_to_distance(cos_sim: f32) -> VectorResult<f32> {
    if cos_sim.is_nan() || !(0.0..=1.0).contains(&cos_sim) {
        return Err(VectorError::InvalidThreshold { value: cos_sim });
    }
    // Round-off near 1.0 can push the radicand slightly below zero.
    Ok((2.0 - 2.0 * cos_sim).max(0.0).sqrt())
}

/// Converts an L2 distance between unit vectors back into cosine similarity.
#[must_use]
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 - (distance * distance) / 2.0
}

/// Clamps an (estimated) similarity into the caller-facing [0, 1] range.
///
/// Quantized distances are estimates and can land marginally outside the
/// exact range.
#[must_use]
pub fn clamp_similarity(similarity: f32) -> f32 {
    if similarity.is_nan() {
        0.0
    } else {
        similarity.clamp(0.0, 1.0)
    }
}
