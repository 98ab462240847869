//! Error types for the clone search engine
//!
//! This module provides the top-level error used by the searcher and the
//! indexer. Component errors (`VectorError`, `MetadataError`) convert into it
//! with `?`.

use thiserror::Error;

use crate::metadata::MetadataError;
use crate::vector::{VectorError, VectorId};

/// Main error type for search and ingestion operations
#[derive(Error, Debug)]
pub enum CloneError {
    /// Index, embedding and artifact errors
    #[error(transparent)]
    Vector(#[from] VectorError),

    /// Metadata store errors
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Configuration file or environment could not be read
    #[error("Failed to load configuration: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Snippet {id} not found in the metadata store. Was it ingested?")]
    SnippetNotFound { id: VectorId },

    /// General errors carrying context
    #[error("{0}")]
    General(String),
}

impl CloneError {
    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that callers can match on without parsing
    /// messages.
    pub fn status_code(&self) -> String {
        match self {
            Self::Vector(inner) => match inner {
                VectorError::Configuration { .. } => "CONFIGURATION_ERROR",
                VectorError::State { .. } => "STATE_ERROR",
                VectorError::DimensionMismatch { .. } | VectorError::InvalidDimension { .. } => {
                    "DIMENSION_MISMATCH"
                }
                VectorError::InvalidScore { .. }
                | VectorError::InvalidThreshold { .. }
                | VectorError::InvalidDistance { .. }
                | VectorError::InvalidProbeCount { .. }
                | VectorError::LengthMismatch { .. } => "VALIDATION_ERROR",
                VectorError::ClusteringFailed(_) => "CLUSTERING_FAILED",
                VectorError::EmbeddingFailed(_) => "EMBEDDING_FAILED",
                VectorError::Storage(_) => "IO_ERROR",
                VectorError::CorruptArtifact { .. } => "CORRUPT_ARTIFACT",
                VectorError::Serialization(_) => "SERIALIZATION_ERROR",
                VectorError::VersionMismatch { .. } => "VERSION_MISMATCH",
            },
            Self::Metadata(inner) => match inner {
                MetadataError::Sqlite(_) => "METADATA_DATABASE_ERROR",
                MetadataError::Io(_) => "IO_ERROR",
                MetadataError::InvalidRange { .. } => "VALIDATION_ERROR",
                MetadataError::IntegerOverflow(_) => "METADATA_OVERFLOW",
            },
            Self::Config(_) => "CONFIG_ERROR",
            Self::SnippetNotFound { .. } => "SNIPPET_NOT_FOUND",
            Self::General(_) => "GENERAL_ERROR",
        }
        .to_string()
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Vector(VectorError::State { .. }) => vec![
                "Train the index on a sample of embeddings before adding vectors",
                "Load a saved index artifact instead of creating a new one",
            ],
            Self::Vector(
                VectorError::CorruptArtifact { .. } | VectorError::VersionMismatch { .. },
            ) => vec![
                "Rebuild the index from the source snippets",
                "Check for disk errors or an interrupted copy of the artifact",
            ],
            Self::Vector(VectorError::DimensionMismatch { .. }) => vec![
                "Make index.dimension match the embedding model output",
                "Re-embed all snippets after switching models",
            ],
            Self::Vector(VectorError::ClusteringFailed(_)) => vec![
                "Provide at least cluster_count training vectors",
                "Lower index.cluster_count or use the exact index for small corpora",
            ],
            Self::Vector(VectorError::EmbeddingFailed(_)) => vec![
                "Check network access for the first model download",
                "Verify embedding.cache_dir is writable",
            ],
            Self::Metadata(MetadataError::Sqlite(_)) => vec![
                "Check that no other process holds a write lock on the database",
                "Delete the metadata database and re-ingest if it is corrupted",
            ],
            Self::Config(_) => vec![
                "Check the settings.toml syntax",
                "Check CC_ environment variables for typos",
            ],
            Self::SnippetNotFound { .. } => vec!["Ingest the snippet before searching by its id"],
            _ => vec![],
        }
    }
}

/// Result type alias for search and ingestion operations
pub type CloneResult<T> = Result<T, CloneError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, msg: &str) -> Result<T, CloneError>;
}

impl<T, E> ErrorContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, msg: &str) -> Result<T, CloneError> {
        self.map_err(|e| CloneError::General(format!("{msg}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let err: CloneError = VectorError::InvalidThreshold { value: 2.0 }.into();
        assert_eq!(err.status_code(), "VALIDATION_ERROR");

        let err: CloneError = VectorError::State {
            operation: "add",
            state: "created".to_string(),
            suggestion: "train first",
        }
        .into();
        assert_eq!(err.status_code(), "STATE_ERROR");
        assert!(!err.recovery_suggestions().is_empty());

        let err = CloneError::SnippetNotFound { id: VectorId::new(3) };
        assert_eq!(err.status_code(), "SNIPPET_NOT_FOUND");
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_error_context() {
        let result: Result<(), std::io::Error> = Err(std::io::Error::other("disk gone"));
        let err = result.context("saving index").unwrap_err();
        assert_eq!(err.to_string(), "saving index: disk gone");
        assert_eq!(err.status_code(), "GENERAL_ERROR");
    }
}
