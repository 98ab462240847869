//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::hash::{DefaultHasher, Hash, Hasher};

use codeclone::vector::{VectorDimension, normalize_in_place};
use codeclone::{CodeSnippet, EmbeddingGenerator, VectorError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Deterministic embedder: character trigrams hashed into buckets.
///
/// Texts that share most of their code end up close together, which is all
/// the clone search needs to be exercised without downloading a model.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl EmbeddingGenerator for HashEmbedder {
    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut embedding = vec![0.0f32; self.dimension];
                let chars: Vec<char> = text.chars().collect();
                for window in chars.windows(3) {
                    let mut hasher = DefaultHasher::new();
                    window.hash(&mut hasher);
                    embedding[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
                }
                normalize_in_place(&mut embedding);
                embedding
            })
            .collect())
    }

    fn dimension(&self) -> VectorDimension {
        VectorDimension::new(self.dimension).expect("non-zero test dimension")
    }
}

/// `n` random unit vectors.
pub fn random_unit_vectors(n: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut v: Vec<f32> = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
            normalize_in_place(&mut v);
            v
        })
        .collect()
}

/// Unit vectors grouped tightly around `centers` random directions.
///
/// Returns `(centers, points)`; points are laid out center by center.
pub fn clustered_unit_vectors(
    centers: usize,
    per_center: usize,
    dimension: usize,
    spread: f32,
    seed: u64,
) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let centers = random_unit_vectors(centers, dimension, seed.wrapping_add(1));
    let mut points = Vec::with_capacity(centers.len() * per_center);
    for center in &centers {
        for _ in 0..per_center {
            let mut v: Vec<f32> = center
                .iter()
                .map(|x| x + rng.random_range(-spread..spread))
                .collect();
            normalize_in_place(&mut v);
            points.push(v);
        }
    }
    (centers, points)
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// IDs whose cosine similarity to `query` is at least `threshold`, by brute force.
pub fn brute_force_ids(vectors: &[Vec<f32>], query: &[f32], threshold: f32) -> Vec<i64> {
    let mut ids: Vec<i64> = vectors
        .iter()
        .enumerate()
        .filter(|(_, v)| dot(v, query) >= threshold)
        .map(|(i, _)| i as i64)
        .collect();
    ids.sort_unstable();
    ids
}

pub fn snippet(
    code: &str,
    file_path: &str,
    start_line: u32,
    end_line: u32,
    language: &str,
) -> CodeSnippet {
    CodeSnippet {
        code: code.to_string(),
        file_path: file_path.to_string(),
        start_line,
        end_line,
        language: language.to_string(),
        function_name: None,
    }
}

/// Ten small functions: a few near-duplicates and some unrelated code.
pub fn sample_snippets() -> Vec<CodeSnippet> {
    vec![
        snippet("def add(a, b):\n    return a + b", "math/ops.py", 1, 2, "python"),
        snippet("def add(x, y):\n    return x + y", "util/helpers.py", 10, 11, "python"),
        snippet(
            "def plus(a, b):\n    result = a + b\n    return result",
            "legacy/calc.py",
            4,
            6,
            "python",
        ),
        snippet(
            "def read_config(path):\n    with open(path) as f:\n        return json.load(f)",
            "config/io.py",
            1,
            3,
            "python",
        ),
        snippet(
            "def load_config(filename):\n    with open(filename) as handle:\n        return json.load(handle)",
            "app/settings.py",
            20,
            22,
            "python",
        ),
        snippet(
            "fn parse_port(s: &str) -> Option<u16> {\n    s.parse().ok()\n}",
            "src/net.rs",
            5,
            7,
            "rust",
        ),
        snippet(
            "fn parse_port(value: &str) -> Option<u16> {\n    value.parse().ok()\n}",
            "src/cli.rs",
            40,
            42,
            "rust",
        ),
        snippet(
            "function sum(items) {\n  return items.reduce((a, b) => a + b, 0);\n}",
            "web/sum.js",
            1,
            3,
            "javascript",
        ),
        snippet(
            "class Stack:\n    def __init__(self):\n        self.items = []",
            "ds/stack.py",
            1,
            3,
            "python",
        ),
        snippet(
            "SELECT id, name FROM users WHERE active = 1 ORDER BY name",
            "sql/users.sql",
            1,
            1,
            "sql",
        ),
    ]
}
