//! Configuration module for the clone search engine.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `CC_` and use double underscores
//! to separate nested levels:
//! - `CC_INDEX__PROBE_COUNT=32` sets `index.probe_count`
//! - `CC_QUERY__DEFAULT_SIMILARITY=0.9` sets `query.default_similarity`
//! - `CC_INDEXING__PARALLEL_THREADS=8` sets `indexing.parallel_threads`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::vector::{IndexConfiguration, IndexKind, VectorError};

/// Directory holding the settings file and default artifacts.
pub const WORKSPACE_DIR: &str = ".codeclone";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CC_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Vector index shape and persistence
    #[serde(default)]
    pub index: IndexSettings,

    /// Query defaults
    #[serde(default)]
    pub query: QueryConfig,

    /// Embedding model settings
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Snippet metadata storage
    #[serde(default)]
    pub metadata: MetadataConfig,

    /// Ingestion settings
    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexSettings {
    /// Embedding dimension
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Index type: "Flat", "IVF,Flat" or "IVF,PQ"
    #[serde(default)]
    pub kind: IndexKind,

    /// Number of k-means clusters
    #[serde(default = "default_cluster_count")]
    pub cluster_count: usize,

    /// Product quantizer sub-vectors (must divide `dimension`)
    #[serde(default = "default_subvector_count")]
    pub subvector_count: usize,

    /// Bits per sub-vector code
    #[serde(default = "default_bits_per_code")]
    pub bits_per_code: u8,

    /// Clusters probed per query
    #[serde(default = "default_probe_count")]
    pub probe_count: usize,

    #[serde(default = "default_false")]
    pub use_accelerator: bool,

    #[serde(default = "default_kmeans_iterations")]
    pub kmeans_iterations: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Upper bound on vectors used for training
    #[serde(default = "default_training_sample_size")]
    pub training_sample_size: usize,

    /// Where the index artifact is saved
    #[serde(default = "default_artifact_path")]
    pub artifact_path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QueryConfig {
    /// Minimum cosine similarity when the caller gives none
    #[serde(default = "default_similarity")]
    pub default_similarity: f32,

    /// Maximum matches returned per query
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Drop matches that are the query itself
    #[serde(default = "default_true")]
    pub exclude_self: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// Model to use for embeddings
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Texts per embedding call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Where downloaded models are cached
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_false")]
    pub show_download_progress: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MetadataConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexingConfig {
    /// Number of parallel threads for ingestion
    #[serde(default = "default_parallel_threads")]
    pub parallel_threads: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_dimension() -> usize {
    IndexConfiguration::default().dimension
}
fn default_cluster_count() -> usize {
    IndexConfiguration::default().cluster_count
}
fn default_subvector_count() -> usize {
    IndexConfiguration::default().subvector_count
}
fn default_bits_per_code() -> u8 {
    IndexConfiguration::default().bits_per_code
}
fn default_probe_count() -> usize {
    IndexConfiguration::default().probe_count
}
fn default_kmeans_iterations() -> usize {
    IndexConfiguration::default().kmeans_iterations
}
fn default_seed() -> u64 {
    IndexConfiguration::default().seed
}
fn default_training_sample_size() -> usize {
    100_000
}
fn default_artifact_path() -> PathBuf {
    PathBuf::from(".codeclone/clones.idx")
}
fn default_similarity() -> f32 {
    0.95
}
fn default_max_results() -> usize {
    100
}
fn default_embedding_model() -> String {
    "JinaEmbeddingsV2BaseCode".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from(".codeclone/models")
}
fn default_database_path() -> PathBuf {
    PathBuf::from(".codeclone/metadata.db")
}
fn default_parallel_threads() -> usize {
    num_cpus::get()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            index: IndexSettings::default(),
            query: QueryConfig::default(),
            embedding: EmbeddingConfig::default(),
            metadata: MetadataConfig::default(),
            indexing: IndexingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for IndexSettings {
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
            training_sample_size: default_training_sample_size(),
            artifact_path: default_artifact_path(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_similarity: default_similarity(),
            max_results: default_max_results(),
            exclude_self: true,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            cache_dir: default_cache_dir(),
            show_download_progress: false,
        }
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            parallel_threads: default_parallel_threads(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl IndexSettings {
    /// The index configuration these settings describe.
    pub fn index_configuration(&self) -> IndexConfiguration {
        IndexConfiguration {
            dimension: self.dimension,
            kind: self.kind,
            cluster_count: self.cluster_count,
            subvector_count: self.subvector_count,
            bits_per_code: self.bits_per_code,
            probe_count: self.probe_count,
            use_accelerator: self.use_accelerator,
            kmeans_iterations: self.kmeans_iterations,
            seed: self.seed,
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(WORKSPACE_DIR).join("settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring `CC_` overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path))
            // Double underscore separates nested levels; single underscores
            // stay inside field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the settings file by looking for a `.codeclone` directory from
    /// the current directory up to the filesystem root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(WORKSPACE_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join("settings.toml"))
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Checks values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<(), VectorError> {
        self.index.index_configuration().validate()?;

        let similarity = self.query.default_similarity;
        if similarity.is_nan() || !(0.0..=1.0).contains(&similarity) {
            return Err(VectorError::Configuration {
                reason: format!("query.default_similarity must be within [0, 1], got {similarity}"),
            });
        }
        if self.query.max_results == 0 {
            return Err(VectorError::Configuration {
                reason: "query.max_results must be at least 1".to_string(),
            });
        }
        if self.embedding.batch_size == 0 {
            return Err(VectorError::Configuration {
                reason: "embedding.batch_size must be at least 1".to_string(),
            });
        }
        if self.index.training_sample_size == 0 {
            return Err(VectorError::Configuration {
                reason: "index.training_sample_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
