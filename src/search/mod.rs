//! Clone search on top of the vector index.
//!
//! [`CloneIndexer`] turns code snippets into stored vectors plus metadata.
//! [`CloneSearcher`] answers "which snippets are at least this similar" by
//! converting the similarity threshold into an L2 radius and hydrating the
//! range-search hits.

mod hydrate;
mod ingest;
mod searcher;

pub use hydrate::{CloneMatch, ResultHydrator};
pub use ingest::{CloneIndexer, IngestReport};
pub use searcher::{CloneSearcher, SearchStatistics};
