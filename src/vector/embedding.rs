//! Embedding generation for code snippets.
//!
//! The index never computes embeddings itself; it receives them through the
//! [`EmbeddingGenerator`] trait. [`FastEmbedGenerator`] is the production
//! implementation over `fastembed`, and [`LazyEmbeddingGenerator`] defers
//! loading the model until the first text is embedded.

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use once_cell::sync::OnceCell;

use crate::config::EmbeddingConfig;
use crate::vector::{VectorDimension, VectorError};

/// Trait for generating embeddings from text.
///
/// Implementations must be deterministic for a fixed model and safe to share
/// between threads.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts, one per input, in order.
    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Generate the embedding of a single text.
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.embed_many(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| VectorError::EmbeddingFailed("model returned no embedding".to_string()))
    }

    /// Get the dimension of embeddings produced by this generator.
    #[must_use]
    fn dimension(&self) -> VectorDimension;
}

/// Resolves a configured model name to a `fastembed` model.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, VectorError> {
    match name {
        "JinaEmbeddingsV2BaseCode" => Ok(EmbeddingModel::JinaEmbeddingsV2BaseCode),
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        "NomicEmbedTextV15" => Ok(EmbeddingModel::NomicEmbedTextV15),
        other => Err(VectorError::Configuration {
            reason: format!(
                "unknown embedding model '{other}'. Supported: JinaEmbeddingsV2BaseCode, AllMiniLML6V2, BGESmallENV15, BGEBaseENV15, NomicEmbedTextV15"
            ),
        }),
    }
}

/// `fastembed`-backed generator.
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimension: VectorDimension,
}

impl FastEmbedGenerator {
    /// Loads (downloading on first use) the configured model.
    ///
    /// # Errors
    /// Returns an error if the model name is unknown or the model fails to
    /// initialize.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, VectorError> {
        let model = parse_embedding_model(&config.model)?;
        Self::with_model(
            model,
            &config.model,
            config.cache_dir.clone(),
            config.show_download_progress,
        )
    }

    fn with_model(
        model: EmbeddingModel,
        model_name: &str,
        cache_dir: PathBuf,
        show_download_progress: bool,
    ) -> Result<Self, VectorError> {
        tracing::info!(
            model = model_name,
            cache_dir = %cache_dir.display(),
            "loading embedding model"
        );

        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        // Probe the output width instead of trusting a table of model sizes.
        let probe = text_model
            .embed(vec!["fn probe() {}"], None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to probe model dimension: {e}"))
            })?;
        let width = probe.first().map(Vec::len).unwrap_or(0);
        let dimension = VectorDimension::new(width)?;

        Ok(Self {
            model: Mutex::new(text_model),
            model_name: model_name.to_string(),
            dimension,
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let text_strings: Vec<String> = texts.iter().map(|&s| s.to_string()).collect();

        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                VectorError::EmbeddingFailed(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(text_strings, None)
            .map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })?;

        if embeddings.len() != texts.len() {
            return Err(VectorError::LengthMismatch {
                left_name: "texts",
                left: texts.len(),
                right_name: "embeddings",
                right: embeddings.len(),
            });
        }
        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

impl std::fmt::Debug for FastEmbedGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedGenerator")
            .field("model", &self.model_name)
            .field("dimension", &self.dimension)
            .finish()
    }
}

/// Generator that loads its model on first use.
///
/// The expected dimension comes from configuration so that index setup does
/// not force a model download.
#[derive(Debug)]
pub struct LazyEmbeddingGenerator {
    config: EmbeddingConfig,
    dimension: VectorDimension,
    inner: OnceCell<FastEmbedGenerator>,
}

impl LazyEmbeddingGenerator {
    pub fn new(config: EmbeddingConfig, dimension: VectorDimension) -> Self {
        Self {
            config,
            dimension,
            inner: OnceCell::new(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.get().is_some()
    }

    fn generator(&self) -> Result<&FastEmbedGenerator, VectorError> {
        let generator = self
            .inner
            .get_or_try_init(|| FastEmbedGenerator::from_config(&self.config))?;
        if generator.dimension() != self.dimension {
            return Err(VectorError::DimensionMismatch {
                expected: self.dimension.get(),
                actual: generator.dimension().get(),
            });
        }
        Ok(generator)
    }
}

impl EmbeddingGenerator for LazyEmbeddingGenerator {
    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.generator()?.embed_many(texts)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

/// Mock embedding generator for testing.
///
/// Hashes character trigrams into buckets, so texts sharing most of their
/// code land close together and unrelated texts land far apart.
#[cfg(test)]
pub struct MockEmbeddingGenerator {
    dimension: VectorDimension,
}

#[cfg(test)]
impl MockEmbeddingGenerator {
    #[must_use]
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: VectorDimension::new(dimension).expect("non-zero test dimension"),
        }
    }
}

#[cfg(test)]
impl EmbeddingGenerator for MockEmbeddingGenerator {
    fn embed_many(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, VectorError> {
        use std::hash::{DefaultHasher, Hash, Hasher};

        let dim = self.dimension.get();
        Ok(texts
            .iter()
            .map(|text| {
                let mut embedding = vec![0.0f32; dim];
                let chars: Vec<char> = text.chars().collect();
                for window in chars.windows(3) {
                    let mut hasher = DefaultHasher::new();
                    window.hash(&mut hasher);
                    embedding[(hasher.finish() % dim as u64) as usize] += 1.0;
                }
                crate::vector::normalize_in_place(&mut embedding);
                embedding
            })
            .collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}
