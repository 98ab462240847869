//! Unit-length normalization of embedding vectors.
//!
//! Every vector that enters the index or is used as a query is rescaled to
//! unit Euclidean length. On unit vectors the squared L2 distance and the
//! cosine similarity are related by `d² = 2 - 2·cos`, which is what lets the
//! index answer cosine-threshold queries with L2 range searches.

/// Norms below this are treated as the zero vector.
const EPSILON: f32 = 1e-10;

/// Tolerance used by [`is_unit`].
pub const UNIT_TOLERANCE: f32 = 1e-5;

/// Euclidean (L2) norm of a vector.
#[must_use]
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalizes a vector in-place to unit length.
///
/// A zero vector is left untouched.
pub fn normalize_in_place(vector: &mut [f32]) {
    let norm = l2_norm(vector);
    if norm > EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Creates a normalized copy of a vector, leaving the input untouched.
#[must_use]
pub fn normalized(vector: &[f32]) -> Vec<f32> {
    let mut copy = vector.to_vec();
    normalize_in_place(&mut copy);
    copy
}

/// Normalized copies of a batch of vectors.
#[must_use]
pub fn normalize_batch(vectors: &[Vec<f32>]) -> Vec<Vec<f32>> {
    vectors.iter().map(|v| normalized(v)).collect()
}

/// Whether the vector's norm is too small to normalize.
#[must_use]
pub fn is_zero(vector: &[f32]) -> bool {
    l2_norm(vector) <= EPSILON
}

/// Whether the vector has unit length within [`UNIT_TOLERANCE`].
#[must_use]
pub fn is_unit(vector: &[f32]) -> bool {
    (l2_norm(vector) - 1.0).abs() <= UNIT_TOLERANCE
}

/// Cosine similarity between two vectors of any length.
///
/// Defined as 0.0 when either vector is zero, never NaN.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a <= EPSILON || norm_b <= EPSILON {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Squared Euclidean distance between two vectors.
#[must_use]
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}
