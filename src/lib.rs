//! Semantic code clone search.
//!
//! Code snippets are embedded into unit vectors, stored in a vector index
//! (exact, clustered or clustered with product quantization) and searched by
//! similarity threshold: every snippet at least `threshold` cosine-similar to
//! the query comes back, joined with its file, line range and language.

pub mod config;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod search;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use error::{CloneError, CloneResult, ErrorContext};
pub use metadata::{
    CodeSnippet, InMemoryMetadataStore, MetadataError, MetadataResult, MetadataStore,
    SnippetMetadata, SqliteMetadataStore,
};
pub use search::{
    CloneIndexer, CloneMatch, CloneSearcher, IngestReport, ResultHydrator, SearchStatistics,
};
pub use vector::{
    EmbeddingGenerator, IndexConfiguration, IndexKind, RangeSearchResult, SharedVectorIndex,
    VectorError, VectorId, VectorIndex, VectorResult,
};
